// MIT License - Copyright (c) 2026 Peter Wright

//! The authoritative in-memory model of the panel.
//!
//! All mutation funnels through [`StateStore::apply`] (one parsed line →
//! at most one field mutation → one change notification) plus the explicit
//! seeding and session-state setters called by the connection manager.
//! External readers only clone snapshots or subscribe to the event channel.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::comm::ConnectionState;
use crate::config::PanelConfig;
use crate::detect::Topology;
use crate::devices::area::Area;
use crate::devices::output::Output;
use crate::devices::system::{SystemState, SystemStatusFlags};
use crate::devices::zone::{Zone, ZoneStatusFlags};
use crate::event::{AreaChange, EventSender, PanelEvent, ZoneChange};
use crate::message::{Message, SystemEvent};
use crate::protocol::ProtocolMode;

/// A point-in-time copy of the session state.
#[derive(Debug, Clone)]
pub struct PanelSnapshot {
    pub zones: BTreeMap<u32, Zone>,
    pub areas: BTreeMap<u32, Area>,
    pub outputs: BTreeMap<u32, Output>,
    pub system: SystemState,
    pub connection: ConnectionState,
    pub protocol_mode: Option<ProtocolMode>,
    pub firmware_version: Option<String>,
    pub last_contact: Option<DateTime<Utc>>,
    /// Consecutive failed connection attempts; 0 while connected
    pub retry_count: u32,
    pub topology: Topology,
}

impl PanelSnapshot {
    fn new() -> Self {
        Self {
            zones: BTreeMap::new(),
            areas: BTreeMap::new(),
            outputs: BTreeMap::new(),
            system: SystemState::default(),
            connection: ConnectionState::Disconnected,
            protocol_mode: None,
            firmware_version: None,
            last_contact: None,
            retry_count: 0,
            topology: Topology::default(),
        }
    }
}

/// Holds the current snapshot and applies parsed lines to it.
pub struct StateStore {
    inner: RwLock<PanelSnapshot>,
    event_tx: EventSender,
}

impl StateStore {
    pub fn new(event_tx: EventSender) -> Self {
        Self {
            inner: RwLock::new(PanelSnapshot::new()),
            event_tx,
        }
    }

    pub async fn snapshot(&self) -> PanelSnapshot {
        self.inner.read().await.clone()
    }

    pub async fn zone(&self, id: u32) -> Option<Zone> {
        self.inner.read().await.zones.get(&id).cloned()
    }

    pub async fn area(&self, id: u32) -> Option<Area> {
        self.inner.read().await.areas.get(&id).cloned()
    }

    pub async fn output(&self, id: u32) -> Option<Output> {
        self.inner.read().await.outputs.get(&id).cloned()
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.inner.read().await.connection
    }

    pub async fn protocol_mode(&self) -> Option<ProtocolMode> {
        self.inner.read().await.protocol_mode
    }

    pub async fn firmware_version(&self) -> Option<String> {
        self.inner.read().await.firmware_version.clone()
    }

    pub async fn topology(&self) -> Topology {
        self.inner.read().await.topology.clone()
    }

    pub async fn last_contact(&self) -> Option<DateTime<Utc>> {
        self.inner.read().await.last_contact
    }

    /// Record that a line was received (liveness tracking).
    pub(crate) async fn touch(&self) {
        self.inner.write().await.last_contact = Some(Utc::now());
    }

    pub(crate) async fn set_retry_count(&self, count: u32) {
        self.inner.write().await.retry_count = count;
    }

    pub(crate) async fn set_connection_state(&self, new: ConnectionState) {
        let old = {
            let mut s = self.inner.write().await;
            let old = s.connection;
            s.connection = new;
            old
        };
        if old != new {
            debug!("Connection state: {} -> {}", old, new);
            let _ = self.event_tx.send(PanelEvent::ConnectionStateChanged { old, new });
        }
    }

    pub(crate) async fn set_session_info(
        &self,
        mode: ProtocolMode,
        firmware_version: Option<String>,
    ) {
        let mut s = self.inner.write().await;
        s.protocol_mode = Some(mode);
        s.firmware_version = firmware_version;
    }

    /// Seed zones/areas/outputs from a resolved topology.
    ///
    /// Sealed zones start `sealed=true, open=false` rather than unknown.
    /// Bypass state survives re-seeding: a zone bypassed before a reconnect
    /// stays bypassed until the panel or a command says otherwise.
    pub(crate) async fn seed(&self, topology: &Topology, config: &PanelConfig) {
        let mut s = self.inner.write().await;

        let previously_bypassed: Vec<u32> = s
            .zones
            .values()
            .filter(|z| z.is_bypassed())
            .map(|z| z.id)
            .collect();

        s.zones = topology
            .zones
            .iter()
            .map(|&id| {
                let name = config.zone_name(id);
                let mut zone = if config.sealed_zones.contains(&id) {
                    Zone::new_sealed(id, name)
                } else {
                    Zone::new(id, name)
                };
                if previously_bypassed.contains(&id) {
                    zone.set_flag(ZoneStatusFlags::BYPASSED, true);
                }
                (id, zone)
            })
            .collect();

        s.areas = topology.areas.iter().map(|&id| (id, Area::new(id))).collect();

        let output_count = config.outputs.min(config.panel_type.max_outputs());
        s.outputs = (1..=output_count).map(|id| (id, Output::new(id))).collect();

        s.topology = topology.clone();

        let _ = self.event_tx.send(PanelEvent::TopologyResolved {
            zones: topology.zones.len(),
            areas: topology.areas.len(),
            fallback: topology.fallback,
        });
    }

    /// Apply one parsed line to the snapshot. This is the only write path
    /// for device state; it runs on the reader task, preserving socket order.
    pub(crate) async fn apply(&self, msg: &Message) {
        let mut s = self.inner.write().await;
        match msg {
            Message::ZoneOpen(id) => self.zone_open_close(&mut s, *id, true),
            Message::ZoneClose(id) => self.zone_open_close(&mut s, *id, false),
            Message::ZoneAlarm(id) => {
                self.zone_flag(&mut s, *id, ZoneStatusFlags::ALARM, true, ZoneChange::Alarm);
                self.recompute_area_alarm(&mut s, *id);
            }
            Message::ZoneAlarmRestore(id) => {
                self.zone_flag(
                    &mut s,
                    *id,
                    ZoneStatusFlags::ALARM,
                    false,
                    ZoneChange::AlarmRestored,
                );
                self.recompute_area_alarm(&mut s, *id);
            }
            Message::ZoneTrouble(id) => {
                self.zone_flag(&mut s, *id, ZoneStatusFlags::TROUBLE, true, ZoneChange::Trouble)
            }
            Message::ZoneTroubleRestore(id) => self.zone_flag(
                &mut s,
                *id,
                ZoneStatusFlags::TROUBLE,
                false,
                ZoneChange::TroubleRestored,
            ),
            Message::ZoneBypass(id) | Message::BypassAck {
                zone: id,
                bypassed: true,
            } => self.zone_flag(
                &mut s,
                *id,
                ZoneStatusFlags::BYPASSED,
                true,
                ZoneChange::Bypassed,
            ),
            Message::ZoneBypassRestore(id)
            | Message::BypassAck {
                zone: id,
                bypassed: false,
            } => self.zone_flag(
                &mut s,
                *id,
                ZoneStatusFlags::BYPASSED,
                false,
                ZoneChange::BypassRestored,
            ),
            Message::ZoneSuperviseFail(id) => self.zone_flag(
                &mut s,
                *id,
                ZoneStatusFlags::SUPERVISE_FAIL,
                true,
                ZoneChange::SuperviseFail,
            ),
            Message::ZoneSuperviseRestore(id) => self.zone_flag(
                &mut s,
                *id,
                ZoneStatusFlags::SUPERVISE_FAIL,
                false,
                ZoneChange::SuperviseRestored,
            ),
            Message::AreaArmed { area, mode, user } => {
                self.area_armed(&mut s, *area, *mode, *user)
            }
            Message::AreaDisarmed { area } => self.area_disarmed(&mut s, *area),
            Message::ArmAck { mode, area } => match area {
                Some(area) => self.area_armed(&mut s, *area, *mode, None),
                None => {
                    let ids: Vec<u32> = s.areas.keys().copied().collect();
                    for id in ids {
                        self.area_armed(&mut s, id, *mode, None);
                    }
                }
            },
            Message::DisarmAck { area } => match area {
                Some(area) => self.area_disarmed(&mut s, *area),
                None => {
                    let ids: Vec<u32> = s.areas.keys().copied().collect();
                    for id in ids {
                        self.area_disarmed(&mut s, id);
                    }
                }
            },
            Message::OutputOn(id) => self.output_active(&mut s, *id, true),
            Message::OutputOff(id) => self.output_active(&mut s, *id, false),
            Message::System(ev) => self.system_event(&mut s, *ev),
            Message::EntryDelay { zone, seconds } => self.entry_delay(&mut s, *zone, *seconds),
            Message::ExitDelay { area, seconds } => self.exit_delay(&mut s, *area, *seconds),
            Message::KeypadAlarm(kind) => {
                let _ = self.event_tx.send(PanelEvent::KeypadAlarm(*kind));
            }
            // Command replies without state meaning, and noise
            Message::VersionReply(_)
            | Message::ProgramReply { .. }
            | Message::Ok(_)
            | Message::Error(_)
            | Message::Unrecognized => {}
        }
    }

    fn zone_open_close(&self, s: &mut PanelSnapshot, id: u32, open: bool) {
        let Some(zone) = s.zones.get_mut(&id) else {
            debug!("Open/close for unknown zone {}", id);
            return;
        };
        if zone.is_sealed() {
            // Sealed zones structurally never report open/close; a line
            // here means the sealed list is wrong, not the panel.
            debug!("Discarding open/close for sealed zone {}", id);
            return;
        }
        if zone.set_flag(ZoneStatusFlags::OPEN, open) {
            let change = if open { ZoneChange::Opened } else { ZoneChange::Closed };
            let _ = self.event_tx.send(PanelEvent::ZoneChanged { zone: id, change });
        }
    }

    fn zone_flag(
        &self,
        s: &mut PanelSnapshot,
        id: u32,
        flag: ZoneStatusFlags,
        on: bool,
        change: ZoneChange,
    ) {
        let Some(zone) = s.zones.get_mut(&id) else {
            debug!("Status for unknown zone {}", id);
            return;
        };
        if zone.set_flag(flag, on) {
            let _ = self.event_tx.send(PanelEvent::ZoneChanged { zone: id, change });
        }
    }

    /// Area alarm is derived: set while any zone of the area is in alarm.
    fn recompute_area_alarm(&self, s: &mut PanelSnapshot, zone_id: u32) {
        let Some(area_id) = s.topology.area_of_zone(zone_id) else {
            return;
        };
        let Some(zone_set) = s.topology.zones_by_area.get(&area_id) else {
            return;
        };
        let any_alarm = zone_set
            .iter()
            .filter_map(|z| s.zones.get(z))
            .any(|z| z.is_alarm());
        let Some(area) = s.areas.get_mut(&area_id) else {
            return;
        };
        if area.alarm != any_alarm {
            area.alarm = any_alarm;
            let change = if any_alarm { AreaChange::Alarm } else { AreaChange::AlarmRestored };
            let _ = self.event_tx.send(PanelEvent::AreaChanged { area: area_id, change });
        }
    }

    fn area_armed(&self, s: &mut PanelSnapshot, id: u32, mode: crate::config::ArmMode, user: Option<u32>) {
        let Some(area) = s.areas.get_mut(&id) else {
            debug!("Arm state for unknown area {}", id);
            return;
        };
        if area.set_armed(mode, user) {
            let _ = self.event_tx.send(PanelEvent::AreaChanged {
                area: id,
                change: AreaChange::Armed { mode, user },
            });
        }
    }

    fn area_disarmed(&self, s: &mut PanelSnapshot, id: u32) {
        let Some(area) = s.areas.get_mut(&id) else {
            debug!("Disarm state for unknown area {}", id);
            return;
        };
        if area.set_disarmed() {
            let _ = self.event_tx.send(PanelEvent::AreaChanged {
                area: id,
                change: AreaChange::Disarmed,
            });
        }
    }

    fn output_active(&self, s: &mut PanelSnapshot, id: u32, active: bool) {
        let Some(output) = s.outputs.get_mut(&id) else {
            debug!("Status for unknown output {}", id);
            return;
        };
        if output.set_active(active) {
            let _ = self.event_tx.send(PanelEvent::OutputChanged { output: id, active });
        }
    }

    fn system_event(&self, s: &mut PanelSnapshot, ev: SystemEvent) {
        let (flag, on) = match ev {
            SystemEvent::ReadyToArm(ready) => (SystemStatusFlags::READY, ready),
            SystemEvent::MainsFail(v) => (SystemStatusFlags::MAINS_FAIL, v),
            SystemEvent::BatteryFail(v) => (SystemStatusFlags::BATTERY_FAIL, v),
            SystemEvent::TamperAlarm(v) => (SystemStatusFlags::TAMPER, v),
            SystemEvent::LineFail(v) => (SystemStatusFlags::LINE_FAIL, v),
            SystemEvent::DialerFail(v) => (SystemStatusFlags::DIALER_FAIL, v),
            SystemEvent::FuseFail(v) => (SystemStatusFlags::FUSE_FAIL, v),
            SystemEvent::DialerActive(v) => (SystemStatusFlags::DIALER_ACTIVE, v),
            SystemEvent::ReceiverFail(v) => (SystemStatusFlags::RECEIVER_FAIL, v),
            SystemEvent::RfBatteryLow(v) => (SystemStatusFlags::RF_BATTERY_LOW, v),
            SystemEvent::SensorWatchAlarm(v) => (SystemStatusFlags::SENSOR_WATCH_ALARM, v),
        };
        if s.system.set_flag(flag, on) {
            let _ = self.event_tx.send(PanelEvent::SystemChanged(ev));
        }
    }

    fn entry_delay(&self, s: &mut PanelSnapshot, zone_id: u32, seconds: u32) {
        let area_id = s.topology.area_of_zone(zone_id);
        if let Some(zone) = s.zones.get_mut(&zone_id) {
            zone.entry_delay = if seconds > 0 { Some(seconds) } else { None };
        }
        let Some(area_id) = area_id else {
            debug!("Entry delay for unmapped zone {}", zone_id);
            return;
        };
        if let Some(area) = s.areas.get_mut(&area_id) {
            if seconds > 0 {
                area.entry_delays.insert(zone_id, seconds);
            } else {
                area.entry_delays.remove(&zone_id);
            }
        }
        let _ = self.event_tx.send(PanelEvent::EntryDelay {
            area: area_id,
            zone: zone_id,
            seconds,
        });
    }

    fn exit_delay(&self, s: &mut PanelSnapshot, area_id: u32, seconds: u32) {
        let Some(area) = s.areas.get_mut(&area_id) else {
            debug!("Exit delay for unknown area {}", area_id);
            return;
        };
        area.exit_delay = if seconds > 0 { Some(seconds) } else { None };
        let _ = self.event_tx.send(PanelEvent::ExitDelay {
            area: area_id,
            seconds,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ArmMode, PanelConfig, PanelType, ZoneSelection};
    use crate::detect::resolve;
    use crate::event::event_channel;

    fn config() -> PanelConfig {
        PanelConfig::builder()
            .panel_type(PanelType::Eci)
            .manual_zones(ZoneSelection::Range(1, 16))
            .manual_areas(vec![1, 2])
            .sealed_zones(vec![7])
            .build()
    }

    async fn seeded_store(config: &PanelConfig) -> StateStore {
        let (tx, _rx) = event_channel(64);
        let store = StateStore::new(tx);
        let topology = resolve(None, config);
        store.seed(&topology, config).await;
        store
    }

    #[tokio::test]
    async fn test_sealed_zone_seeded_closed() {
        let store = seeded_store(&config()).await;
        let zone = store.zone(7).await.unwrap();
        assert!(zone.is_sealed());
        assert!(!zone.is_open());
        // Ordinary zones start clear too, just not sealed
        assert!(!store.zone(1).await.unwrap().is_sealed());
    }

    #[tokio::test]
    async fn test_sealed_zone_discards_open_close() {
        let store = seeded_store(&config()).await;
        store.apply(&Message::ZoneOpen(7)).await;
        let zone = store.zone(7).await.unwrap();
        assert!(!zone.is_open());
        assert!(zone.is_sealed());
    }

    #[tokio::test]
    async fn test_zone_open_close() {
        let store = seeded_store(&config()).await;
        store.apply(&Message::ZoneOpen(1)).await;
        assert!(store.zone(1).await.unwrap().is_open());
        store.apply(&Message::ZoneClose(1)).await;
        assert!(!store.zone(1).await.unwrap().is_open());
    }

    #[tokio::test]
    async fn test_bypass_is_idempotent() {
        let store = seeded_store(&config()).await;
        store.apply(&Message::ZoneBypass(5)).await;
        let once = store.zone(5).await.unwrap();
        store.apply(&Message::ZoneBypass(5)).await;
        let twice = store.zone(5).await.unwrap();
        assert!(twice.is_bypassed());
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn test_bypass_survives_reseed() {
        let cfg = config();
        let store = seeded_store(&cfg).await;
        store.apply(&Message::ZoneBypass(5)).await;

        // Simulate a reconnect: same topology seeded again
        let topology = store.topology().await;
        store.seed(&topology, &cfg).await;

        assert!(store.zone(5).await.unwrap().is_bypassed());
        // Other transient state does not survive
        assert!(!store.zone(5).await.unwrap().is_open());
    }

    #[tokio::test]
    async fn test_whole_panel_arm_ack_arms_all_areas() {
        let store = seeded_store(&config()).await;
        store
            .apply(&Message::ArmAck {
                mode: ArmMode::Away,
                area: None,
            })
            .await;
        for id in [1, 2] {
            let area = store.area(id).await.unwrap();
            assert!(area.armed);
            assert_eq!(area.mode, Some(ArmMode::Away));
        }

        store.apply(&Message::DisarmAck { area: None }).await;
        for id in [1, 2] {
            assert!(!store.area(id).await.unwrap().armed);
        }
    }

    #[tokio::test]
    async fn test_single_area_arm_message() {
        let store = seeded_store(&config()).await;
        store
            .apply(&Message::AreaArmed {
                area: 2,
                mode: ArmMode::Stay,
                user: Some(5),
            })
            .await;
        let area = store.area(2).await.unwrap();
        assert!(area.armed);
        assert_eq!(area.mode, Some(ArmMode::Stay));
        assert_eq!(area.armed_by_user, Some(5));
        assert!(!store.area(1).await.unwrap().armed);

        store.apply(&Message::AreaDisarmed { area: 2 }).await;
        assert!(!store.area(2).await.unwrap().armed);
    }

    #[tokio::test]
    async fn test_area_alarm_derived_from_zones() {
        let store = seeded_store(&config()).await;
        // Zones 1-8 belong to area 1, 9-16 to area 2
        store.apply(&Message::ZoneAlarm(3)).await;
        assert!(store.area(1).await.unwrap().alarm);
        assert!(!store.area(2).await.unwrap().alarm);

        store.apply(&Message::ZoneAlarm(4)).await;
        store.apply(&Message::ZoneAlarmRestore(3)).await;
        assert!(store.area(1).await.unwrap().alarm);

        store.apply(&Message::ZoneAlarmRestore(4)).await;
        assert!(!store.area(1).await.unwrap().alarm);
    }

    #[tokio::test]
    async fn test_entry_and_exit_delays() {
        let store = seeded_store(&config()).await;
        store
            .apply(&Message::EntryDelay {
                zone: 3,
                seconds: 20,
            })
            .await;
        assert_eq!(store.zone(3).await.unwrap().entry_delay, Some(20));
        assert_eq!(store.area(1).await.unwrap().entry_delays.get(&3), Some(&20));

        store.apply(&Message::EntryDelay { zone: 3, seconds: 0 }).await;
        assert_eq!(store.zone(3).await.unwrap().entry_delay, None);
        assert!(store.area(1).await.unwrap().entry_delays.is_empty());

        store
            .apply(&Message::ExitDelay {
                area: 2,
                seconds: 30,
            })
            .await;
        assert_eq!(store.area(2).await.unwrap().exit_delay, Some(30));
        store.apply(&Message::ExitDelay { area: 2, seconds: 0 }).await;
        assert_eq!(store.area(2).await.unwrap().exit_delay, None);
    }

    #[tokio::test]
    async fn test_system_flags() {
        let store = seeded_store(&config()).await;
        store.apply(&Message::System(SystemEvent::MainsFail(true))).await;
        assert!(!store.snapshot().await.system.mains_ok());
        store.apply(&Message::System(SystemEvent::MainsFail(false))).await;
        assert!(store.snapshot().await.system.mains_ok());
        store.apply(&Message::System(SystemEvent::ReadyToArm(true))).await;
        assert!(store.snapshot().await.system.ready_to_arm());
    }

    #[tokio::test]
    async fn test_outputs_seeded_and_updated() {
        let store = seeded_store(&config()).await;
        // Default config models 4 outputs
        assert!(store.output(4).await.is_some());
        assert!(store.output(5).await.is_none());

        store.apply(&Message::OutputOn(2)).await;
        assert!(store.output(2).await.unwrap().active);
        store.apply(&Message::OutputOff(2)).await;
        assert!(!store.output(2).await.unwrap().active);
    }

    #[tokio::test]
    async fn test_unknown_ids_are_ignored() {
        let store = seeded_store(&config()).await;
        // None of these are in the seeded topology; nothing should change
        store.apply(&Message::ZoneOpen(200)).await;
        store.apply(&Message::OutputOn(30)).await;
        store.apply(&Message::AreaArmed { area: 9, mode: ArmMode::Away, user: None }).await;
        let snapshot = store.snapshot().await;
        assert!(snapshot.zones.values().all(|z| !z.is_open()));
        assert!(snapshot.outputs.values().all(|o| !o.active));
        assert!(snapshot.areas.values().all(|a| !a.armed));
    }

    #[tokio::test]
    async fn test_bypass_ack_applies_like_status_line() {
        let store = seeded_store(&config()).await;
        store
            .apply(&Message::BypassAck {
                zone: 5,
                bypassed: true,
            })
            .await;
        assert!(store.zone(5).await.unwrap().is_bypassed());
        store
            .apply(&Message::BypassAck {
                zone: 5,
                bypassed: false,
            })
            .await;
        assert!(!store.zone(5).await.unwrap().is_bypassed());
    }
}
