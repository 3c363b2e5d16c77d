// MIT License - Copyright (c) 2026 Peter Wright

use crate::comm::ConnectionState;
use crate::config::ArmMode;
use crate::message::SystemEvent;
use crate::protocol::KeypadAlarmKind;

/// Per-zone change notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneChange {
    Opened,
    Closed,
    Alarm,
    AlarmRestored,
    Trouble,
    TroubleRestored,
    Bypassed,
    BypassRestored,
    SuperviseFail,
    SuperviseRestored,
}

/// Per-area change notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AreaChange {
    Armed { mode: ArmMode, user: Option<u32> },
    Disarmed,
    Alarm,
    AlarmRestored,
}

/// All events emitted by a panel session.
///
/// Subscribe via `ArrowheadPanel::subscribe()` to receive a
/// `tokio::sync::broadcast::Receiver<PanelEvent>`. Every event corresponds
/// to exactly one state mutation in the store, in the order the panel
/// reported it.
#[derive(Debug, Clone)]
pub enum PanelEvent {
    /// Connection state machine transition
    ConnectionStateChanged {
        old: ConnectionState,
        new: ConnectionState,
    },
    /// Reconnection gave up after the configured number of attempts
    ConnectionFailed { attempts: u32 },
    ZoneChanged { zone: u32, change: ZoneChange },
    AreaChanged { area: u32, change: AreaChange },
    OutputChanged { output: u32, active: bool },
    SystemChanged(SystemEvent),
    /// MODE 4: keypad emergency alarm
    KeypadAlarm(KeypadAlarmKind),
    /// MODE 4: entry-delay countdown tick for a zone
    EntryDelay { area: u32, zone: u32, seconds: u32 },
    /// MODE 4: exit-delay countdown tick for an area
    ExitDelay { area: u32, seconds: u32 },
    /// Topology resolution finished (detection, manual, or fallback)
    TopologyResolved {
        zones: usize,
        areas: usize,
        fallback: bool,
    },
}

/// Type alias for the broadcast sender.
pub type EventSender = tokio::sync::broadcast::Sender<PanelEvent>;

/// Type alias for the broadcast receiver.
pub type EventReceiver = tokio::sync::broadcast::Receiver<PanelEvent>;

/// Create a new event channel with the given capacity.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    tokio::sync::broadcast::channel(capacity)
}
