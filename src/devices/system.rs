// MIT License - Copyright (c) 2026 Peter Wright

use bitflags::bitflags;

bitflags! {
    /// Panel-wide trouble and state bits.
    ///
    /// Fault bits are set by the `*F`-style lines and cleared by their `*R`
    /// counterparts. READY tracks the RO/NR pair. The RF bits only occur on
    /// ESX hardware.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SystemStatusFlags: u16 {
        /// RO/NR — ready to arm
        const READY              = 1 << 0;
        /// MF/MR — mains power failed
        const MAINS_FAIL         = 1 << 1;
        /// BF/BR — backup battery failed
        const BATTERY_FAIL       = 1 << 2;
        /// TA/TR — panel tamper
        const TAMPER             = 1 << 3;
        /// LF/LR — phone line failed
        const LINE_FAIL          = 1 << 4;
        /// DF/DR — dialer failed
        const DIALER_FAIL        = 1 << 5;
        /// FF/FR — fuse/output fuse failed
        const FUSE_FAIL          = 1 << 6;
        /// CAL/CLF — dialer currently reporting
        const DIALER_ACTIVE      = 1 << 7;
        /// RIF/RIR — RF receiver failed (ESX)
        const RECEIVER_FAIL      = 1 << 8;
        /// ZBL/ZBR — some RF zone battery low (ESX)
        const RF_BATTERY_LOW     = 1 << 9;
        /// ZIA/ZIR — sensor-watch alarm (ESX)
        const SENSOR_WATCH_ALARM = 1 << 10;
    }
}

/// Panel-wide state snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SystemState {
    pub status: SystemStatusFlags,
}

impl SystemState {
    /// Set or clear a flag. Returns true if the state changed.
    pub fn set_flag(&mut self, flag: SystemStatusFlags, on: bool) -> bool {
        let before = self.status;
        self.status.set(flag, on);
        before != self.status
    }

    pub fn ready_to_arm(&self) -> bool {
        self.status.contains(SystemStatusFlags::READY)
    }

    pub fn mains_ok(&self) -> bool {
        !self.status.contains(SystemStatusFlags::MAINS_FAIL)
    }

    pub fn battery_ok(&self) -> bool {
        !self.status.contains(SystemStatusFlags::BATTERY_FAIL)
    }

    pub fn line_ok(&self) -> bool {
        !self.status.contains(SystemStatusFlags::LINE_FAIL)
    }

    pub fn dialer_ok(&self) -> bool {
        !self.status.contains(SystemStatusFlags::DIALER_FAIL)
    }

    pub fn fuse_ok(&self) -> bool {
        !self.status.contains(SystemStatusFlags::FUSE_FAIL)
    }

    pub fn tamper_alarm(&self) -> bool {
        self.status.contains(SystemStatusFlags::TAMPER)
    }
}

impl Default for SystemStatusFlags {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_healthy() {
        let sys = SystemState::default();
        assert!(sys.mains_ok());
        assert!(sys.battery_ok());
        assert!(sys.line_ok());
        assert!(sys.fuse_ok());
        assert!(!sys.tamper_alarm());
        assert!(!sys.ready_to_arm());
    }

    #[test]
    fn test_fault_set_and_restore() {
        let mut sys = SystemState::default();
        assert!(sys.set_flag(SystemStatusFlags::MAINS_FAIL, true));
        assert!(!sys.mains_ok());
        assert!(!sys.set_flag(SystemStatusFlags::MAINS_FAIL, true));
        assert!(sys.set_flag(SystemStatusFlags::MAINS_FAIL, false));
        assert!(sys.mains_ok());
    }
}
