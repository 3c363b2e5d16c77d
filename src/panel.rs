// MIT License - Copyright (c) 2026 Peter Wright

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, sleep};
use tracing::{debug, info};

use crate::comm::{self, ConnectionState, SessionShared};
use crate::config::{ArmMode, MAX_AREA_ID, PanelConfig, UserCode};
use crate::detect::Topology;
use crate::devices::area::Area;
use crate::devices::output::Output;
use crate::devices::zone::Zone;
use crate::error::{ArrowheadError, Result};
use crate::event::{EventReceiver, EventSender, event_channel};
use crate::message::Message;
use crate::protocol::{Command, KeypadAlarmKind, ProtocolMode};
use crate::state::{PanelSnapshot, StateStore};

/// Target of an arm/disarm command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmScope {
    AllAreas,
    Area(u32),
}

/// Per-area result of a bulk operation. One area failing does not stop the
/// remaining areas from being attempted.
#[derive(Debug)]
pub struct AreaOutcome {
    pub area: u32,
    pub result: Result<()>,
}

/// The main public API for a single panel session.
///
/// # Example
///
/// ```no_run
/// use arrowhead_lan_bridge::{ArmMode, ArmScope, ArrowheadPanel, PanelConfig, PanelType};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = PanelConfig::builder()
///         .panel_type(PanelType::Eci)
///         .host("192.168.0.50")
///         .user_code("1 123")
///         .build();
///
///     let mut panel = ArrowheadPanel::start(config).await?;
///
///     // Subscribe to events
///     let mut events = panel.subscribe();
///     tokio::spawn(async move {
///         while let Ok(event) = events.recv().await {
///             println!("Event: {:?}", event);
///         }
///     });
///
///     // Query state
///     for (_, zone) in panel.snapshot().await.zones {
///         println!("Zone {}: open={}", zone.id, zone.is_open());
///     }
///
///     // Commands
///     panel.arm(ArmScope::AllAreas, ArmMode::Away).await?;
///
///     panel.stop().await?;
///     Ok(())
/// }
/// ```
pub struct ArrowheadPanel {
    config: PanelConfig,
    shared: Arc<SessionShared>,
    event_tx: EventSender,
    supervisor: Option<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
}

impl ArrowheadPanel {
    /// Connect to the panel and run the session until [`stop`](Self::stop).
    ///
    /// The initial connection retries transient failures on the configured
    /// backoff schedule; authentication rejections fail immediately. Once
    /// this returns, a background supervisor owns reconnection — losing the
    /// socket later never kills the session, it degrades it to
    /// `Disconnected`/`Failed` and keeps the state model queryable.
    pub async fn start(config: PanelConfig) -> Result<Self> {
        let (event_tx, _startup_rx) = event_channel(256);
        let store = Arc::new(StateStore::new(event_tx.clone()));
        let shared = Arc::new(SessionShared::new(store));
        let (lost_tx, lost_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        comm::establish(&shared, &config, &lost_tx).await?;

        let supervisor = comm::spawn_supervisor(
            shared.clone(),
            config.clone(),
            event_tx.clone(),
            lost_rx,
            lost_tx,
            shutdown_rx,
        );

        Ok(Self {
            config,
            shared,
            event_tx,
            supervisor: Some(supervisor),
            shutdown_tx,
        })
    }

    /// Subscribe to panel events.
    pub fn subscribe(&self) -> EventReceiver {
        self.event_tx.subscribe()
    }

    /// Tear the session down: cancel timers and pending commands (they fail
    /// with a connection-lost error) and close the socket.
    pub async fn stop(&mut self) -> Result<()> {
        info!("Stopping panel session");
        let _ = self.shutdown_tx.send(true);
        if let Some(h) = self.supervisor.take() {
            h.abort();
        }
        comm::teardown(&self.shared).await;
        self.shared
            .store
            .set_connection_state(ConnectionState::Disconnected)
            .await;
        Ok(())
    }

    // --- Queries ---

    /// Snapshot of the whole session state.
    pub async fn snapshot(&self) -> PanelSnapshot {
        self.shared.store.snapshot().await
    }

    pub async fn zone_state(&self, id: u32) -> Option<Zone> {
        self.shared.store.zone(id).await
    }

    pub async fn area_state(&self, id: u32) -> Option<Area> {
        self.shared.store.area(id).await
    }

    pub async fn output_state(&self, id: u32) -> Option<Output> {
        self.shared.store.output(id).await
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.shared.store.connection_state().await
    }

    /// The dialect negotiated for the current connection, once connected.
    pub async fn protocol_mode(&self) -> Option<ProtocolMode> {
        self.shared.store.protocol_mode().await
    }

    pub async fn firmware_version(&self) -> Option<String> {
        self.shared.store.firmware_version().await
    }

    pub async fn topology(&self) -> Topology {
        self.shared.store.topology().await
    }

    // --- Commands ---

    /// Arm the whole panel or a single area.
    ///
    /// Per-area arming only exists in the MODE 4 dialect; on a MODE 1
    /// session it fails with `UnsupportedOperation`.
    pub async fn arm(&self, scope: ArmScope, mode: ArmMode) -> Result<()> {
        let cmd = match scope {
            ArmScope::AllAreas => Command::arm_all(mode),
            ArmScope::Area(area) => {
                validate_area(area)?;
                Command::arm_area(area, mode)
            }
        };
        self.dispatch(cmd).await
    }

    /// Disarm the whole panel or a single area. The user code is mandatory:
    /// `"<user> <pin>"`, or a bare PIN for user 1.
    pub async fn disarm(&self, scope: ArmScope, user_code: &str) -> Result<()> {
        let code = UserCode::parse(user_code)?;
        let cmd = match scope {
            ArmScope::AllAreas => Command::Disarm { code },
            ArmScope::Area(area) => {
                validate_area(area)?;
                Command::DisarmArea { area, code }
            }
        };
        self.dispatch(cmd).await
    }

    /// Exclude a zone from arming checks.
    pub async fn bypass_zone(&self, zone: u32) -> Result<()> {
        self.validate_zone(zone)?;
        self.dispatch(Command::Bypass { zone }).await
    }

    /// Re-include a bypassed zone.
    pub async fn unbypass_zone(&self, zone: u32) -> Result<()> {
        self.validate_zone(zone)?;
        self.dispatch(Command::Unbypass { zone }).await
    }

    /// Trigger an output. `duration_secs` 0 means momentary/toggle; any
    /// other value pulses the output for that many seconds.
    pub async fn trigger_output(&self, output: u32, duration_secs: u32) -> Result<()> {
        self.validate_output(output)?;
        let duration_secs = if duration_secs > 0 {
            Some(duration_secs)
        } else {
            None
        };
        self.dispatch(Command::OutputOn {
            output,
            duration_secs,
        })
        .await
    }

    /// Latch an output on.
    pub async fn turn_output_on(&self, output: u32) -> Result<()> {
        self.validate_output(output)?;
        self.dispatch(Command::OutputOn {
            output,
            duration_secs: None,
        })
        .await
    }

    /// Turn an output off.
    pub async fn turn_output_off(&self, output: u32) -> Result<()> {
        self.validate_output(output)?;
        self.dispatch(Command::OutputOff { output }).await
    }

    /// Raise a keypad emergency alarm. MODE 4 only.
    pub async fn trigger_keypad_alarm(&self, kind: KeypadAlarmKind) -> Result<()> {
        self.dispatch(Command::KeypadAlarm { kind }).await
    }

    /// Escape hatch: send a raw protocol string. Returns the raw reply line
    /// when `expect_response` is set.
    pub async fn send_custom_command(
        &self,
        text: &str,
        expect_response: bool,
    ) -> Result<Option<String>> {
        let engine = self.shared.engine().await?;
        let reply = engine
            .send_raw(&Command::Raw {
                text: text.to_string(),
                expect_response,
            })
            .await?;
        Ok(reply.map(|r| r.raw))
    }

    /// Request a full status dump from the panel.
    pub async fn refresh_status(&self) -> Result<()> {
        self.dispatch(Command::Status).await
    }

    // --- Bulk operations ---

    /// Arm several areas, one command per area, pacing commands by `delay`
    /// to protect the panel's input buffer. Failures are per-area.
    pub async fn bulk_arm(&self, areas: &[u32], mode: ArmMode, delay: Duration) -> Vec<AreaOutcome> {
        let mut outcomes = Vec::with_capacity(areas.len());
        for (i, &area) in areas.iter().enumerate() {
            if i > 0 {
                sleep(delay).await;
            }
            debug!("Bulk arm: area {} ({}/{})", area, i + 1, areas.len());
            let result = self.arm(ArmScope::Area(area), mode).await;
            outcomes.push(AreaOutcome { area, result });
        }
        outcomes
    }

    /// Disarm several areas with the same pacing and per-area outcomes as
    /// [`bulk_arm`](Self::bulk_arm). Fails up front if the user code is
    /// malformed.
    pub async fn bulk_disarm(
        &self,
        areas: &[u32],
        user_code: &str,
        delay: Duration,
    ) -> Result<Vec<AreaOutcome>> {
        // Validate once rather than failing every area identically
        UserCode::parse(user_code)?;
        let mut outcomes = Vec::with_capacity(areas.len());
        for (i, &area) in areas.iter().enumerate() {
            if i > 0 {
                sleep(delay).await;
            }
            debug!("Bulk disarm: area {} ({}/{})", area, i + 1, areas.len());
            let result = self.disarm(ArmScope::Area(area), user_code).await;
            outcomes.push(AreaOutcome { area, result });
        }
        Ok(outcomes)
    }

    // --- Internals ---

    /// Mode-gate, serialize, and interpret one command.
    async fn dispatch(&self, cmd: Command) -> Result<()> {
        if cmd.requires_enhanced() {
            let mode = self
                .protocol_mode()
                .await
                .ok_or(ArrowheadError::NotConnected)?;
            if !mode.is_enhanced() {
                return Err(ArrowheadError::UnsupportedOperation { mode });
            }
        }
        let engine = self.shared.engine().await?;
        match engine.send(&cmd).await? {
            Some(Message::Error(response)) => Err(ArrowheadError::CommandRejected {
                command: cmd.to_wire_string(),
                response,
            }),
            _ => Ok(()),
        }
    }

    fn validate_zone(&self, id: u32) -> Result<()> {
        let max = self.config.panel_type.max_zones();
        if (1..=max).contains(&id) {
            Ok(())
        } else {
            Err(ArrowheadError::InvalidZone { id, max })
        }
    }

    fn validate_output(&self, id: u32) -> Result<()> {
        let max = self.config.panel_type.max_outputs();
        if (1..=max).contains(&id) {
            Ok(())
        } else {
            Err(ArrowheadError::InvalidOutput { id, max })
        }
    }
}

fn validate_area(id: u32) -> Result<()> {
    if (1..=MAX_AREA_ID).contains(&id) {
        Ok(())
    } else {
        Err(ArrowheadError::InvalidArea {
            id,
            max: MAX_AREA_ID,
        })
    }
}

impl Drop for ArrowheadPanel {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(h) = self.supervisor.take() {
            h.abort();
        }
        self.shared.abort_tasks();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_area_bounds() {
        assert!(validate_area(1).is_ok());
        assert!(validate_area(32).is_ok());
        assert!(matches!(
            validate_area(0),
            Err(ArrowheadError::InvalidArea { id: 0, .. })
        ));
        assert!(matches!(
            validate_area(33),
            Err(ArrowheadError::InvalidArea { id: 33, .. })
        ));
    }
}
