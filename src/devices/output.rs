// MIT License - Copyright (c) 2026 Peter Wright

/// A panel-controlled relay output.
///
/// Outputs are configured, not discovered: the session seeds `1..=n` from
/// the configuration and tracks on/off from OO/OR lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    pub id: u32,
    pub name: String,
    pub active: bool,
    /// Pulse duration of the last timed OUTPUTON, if any
    pub pulse_secs: Option<u32>,
}

impl Output {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            name: format!("Output {}", id),
            active: false,
            pulse_secs: None,
        }
    }

    /// Update the active state. Returns true if it changed.
    pub fn set_active(&mut self, active: bool) -> bool {
        let changed = self.active != active;
        self.active = active;
        if !active {
            self.pulse_secs = None;
        }
        changed
    }
}
