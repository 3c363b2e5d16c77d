// MIT License - Copyright (c) 2026 Peter Wright

use std::collections::BTreeMap;

use crate::config::ArmMode;

/// A logical arming partition grouping a subset of zones.
///
/// There is one record shape for every area, including the whole-panel
/// case: whole-panel arm commands simply update all areas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Area {
    pub id: u32,
    pub armed: bool,
    /// Arm mode while armed
    pub mode: Option<ArmMode>,
    /// Any zone of this area is in alarm
    pub alarm: bool,
    /// MODE 4: user number that armed the area
    pub armed_by_user: Option<u32>,
    /// MODE 4: remaining exit-delay seconds while counting down
    pub exit_delay: Option<u32>,
    /// MODE 4: remaining entry-delay seconds per affected zone
    pub entry_delays: BTreeMap<u32, u32>,
}

impl Area {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            armed: false,
            mode: None,
            alarm: false,
            armed_by_user: None,
            exit_delay: None,
            entry_delays: BTreeMap::new(),
        }
    }

    /// Mark the area armed. Clears any pending exit delay.
    pub fn set_armed(&mut self, mode: ArmMode, user: Option<u32>) -> bool {
        let changed = !self.armed || self.mode != Some(mode) || self.armed_by_user != user;
        self.armed = true;
        self.mode = Some(mode);
        self.armed_by_user = user;
        self.exit_delay = None;
        changed
    }

    /// Mark the area disarmed. Clears alarm and transient delays.
    pub fn set_disarmed(&mut self) -> bool {
        let changed = self.armed || self.alarm;
        self.armed = false;
        self.mode = None;
        self.armed_by_user = None;
        self.alarm = false;
        self.exit_delay = None;
        self.entry_delays.clear();
        changed
    }
}
