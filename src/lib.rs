// MIT License - Copyright (c) 2026 Peter Wright
//
//! # arrowhead-lan-bridge
//!
//! Direct TCP/IP communication with Arrowhead Alarm Products panels
//! (ESX Elite-SX, ECi Series).
//!
//! This library maintains a long-lived session to the panel's automation
//! port: it authenticates, negotiates the protocol dialect (legacy MODE 1
//! vs. the MODE 4 home-automation dialect on recent ECi firmware), issues
//! textual commands, parses the panel's unsolicited status lines into typed
//! events, and keeps an in-memory model of zones, areas and outputs that
//! callers can query or subscribe to. No external dependencies beyond
//! tokio, thiserror, tracing, bitflags, and chrono.
//!
//! ## Quick Start
//!
//! ```no_run
//! use arrowhead_lan_bridge::{ArmMode, ArmScope, ArrowheadPanel, PanelConfig, PanelType};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PanelConfig::builder()
//!         .panel_type(PanelType::Eci)
//!         .host("192.168.0.50")
//!         .user_code("1 123")
//!         .build();
//!
//!     let mut panel = ArrowheadPanel::start(config).await?;
//!
//!     let mut events = panel.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     panel.arm(ArmScope::AllAreas, ArmMode::Away).await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     panel.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod comm;
pub mod config;
pub mod detect;
pub mod devices;
pub mod error;
pub mod event;
pub mod message;
pub mod panel;
pub mod protocol;
pub mod state;
pub mod transport;

// Re-exports for convenience
pub use comm::ConnectionState;
pub use config::{ArmMode, PanelConfig, PanelConfigBuilder, PanelType, UserCode, ZoneSelection};
pub use detect::{Topology, TopologySource};
pub use devices::area::Area;
pub use devices::output::Output;
pub use devices::system::{SystemState, SystemStatusFlags};
pub use devices::zone::{Zone, ZoneStatusFlags};
pub use error::{ArrowheadError, Result};
pub use event::{AreaChange, EventReceiver, PanelEvent, ZoneChange};
pub use message::{Message, SystemEvent};
pub use panel::{AreaOutcome, ArmScope, ArrowheadPanel};
pub use protocol::{KeypadAlarmKind, ProtocolMode};
pub use state::PanelSnapshot;
