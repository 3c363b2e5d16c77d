// MIT License - Copyright (c) 2026 Peter Wright

use bitflags::bitflags;

bitflags! {
    /// Zone status bits.
    ///
    /// Each bit is driven by a dedicated pair of status lines (ZO/ZC,
    /// ZA/ZR, ...) except SEALED, which is configuration: a sealed zone
    /// structurally never reports open/close, so the flag is seeded at
    /// session setup and never changes afterwards.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ZoneStatusFlags: u8 {
        const OPEN           = 0b0000_0001;
        const ALARM          = 0b0000_0010;
        const TROUBLE        = 0b0000_0100;
        const BYPASSED       = 0b0000_1000;
        const SEALED         = 0b0001_0000;
        /// RF supervision failure (ESX only)
        const SUPERVISE_FAIL = 0b0010_0000;
    }
}

impl ZoneStatusFlags {
    /// Get the flags that changed between old and new status.
    pub fn changed(old: Self, new: Self) -> Self {
        old ^ new
    }
}

/// A single monitored input point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zone {
    pub id: u32,
    pub name: String,
    pub status: ZoneStatusFlags,
    /// MODE 4: remaining entry-delay seconds while counting down
    pub entry_delay: Option<u32>,
}

impl Zone {
    pub fn new(id: u32, name: String) -> Self {
        Self {
            id,
            name,
            status: ZoneStatusFlags::empty(),
            entry_delay: None,
        }
    }

    /// A sealed zone starts closed rather than "unknown": it will never
    /// receive an open/close line to correct it.
    pub fn new_sealed(id: u32, name: String) -> Self {
        Self {
            id,
            name,
            status: ZoneStatusFlags::SEALED,
            entry_delay: None,
        }
    }

    /// Set or clear a status flag. Returns true if the state changed.
    pub fn set_flag(&mut self, flag: ZoneStatusFlags, on: bool) -> bool {
        let before = self.status;
        self.status.set(flag, on);
        before != self.status
    }

    pub fn is_open(&self) -> bool {
        self.status.contains(ZoneStatusFlags::OPEN)
    }

    pub fn is_alarm(&self) -> bool {
        self.status.contains(ZoneStatusFlags::ALARM)
    }

    pub fn is_trouble(&self) -> bool {
        self.status.contains(ZoneStatusFlags::TROUBLE)
    }

    pub fn is_bypassed(&self) -> bool {
        self.status.contains(ZoneStatusFlags::BYPASSED)
    }

    pub fn is_sealed(&self) -> bool {
        self.status.contains(ZoneStatusFlags::SEALED)
    }

    pub fn is_supervise_fail(&self) -> bool {
        self.status.contains(ZoneStatusFlags::SUPERVISE_FAIL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_zone_is_clear() {
        let zone = Zone::new(1, "Zone 001".into());
        assert!(!zone.is_open());
        assert!(!zone.is_alarm());
        assert!(!zone.is_bypassed());
        assert!(!zone.is_sealed());
    }

    #[test]
    fn test_sealed_zone_starts_closed() {
        let zone = Zone::new_sealed(7, "Zone 007".into());
        assert!(zone.is_sealed());
        assert!(!zone.is_open());
    }

    #[test]
    fn test_set_flag_reports_change() {
        let mut zone = Zone::new(1, "Zone 001".into());
        assert!(zone.set_flag(ZoneStatusFlags::OPEN, true));
        assert!(zone.is_open());
        // Setting the same value again is a no-op
        assert!(!zone.set_flag(ZoneStatusFlags::OPEN, true));
        assert!(zone.set_flag(ZoneStatusFlags::OPEN, false));
        assert!(!zone.is_open());
    }

    #[test]
    fn test_changed_flags() {
        let old = ZoneStatusFlags::OPEN | ZoneStatusFlags::BYPASSED;
        let new = ZoneStatusFlags::BYPASSED | ZoneStatusFlags::ALARM;
        let changed = ZoneStatusFlags::changed(old, new);
        assert!(changed.contains(ZoneStatusFlags::OPEN));
        assert!(changed.contains(ZoneStatusFlags::ALARM));
        assert!(!changed.contains(ZoneStatusFlags::BYPASSED));
    }
}
