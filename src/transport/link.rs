// MIT License - Copyright (c) 2026 Peter Wright

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

use crate::message::{Message, parse_line};
use crate::protocol::ProtocolMode;
use crate::state::StateStore;
use crate::transport::command::{CommandEngine, Reply};

/// Notification that a connection generation lost its socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkLoss {
    pub generation: u64,
}

/// Spawn the reader task for one connection generation.
///
/// The task drains the socket line by line: every line refreshes the
/// liveness timestamp, command replies are routed to the engine's pending
/// slot, and everything is applied to the state store in arrival order.
/// EOF or a read error reports a [`LinkLoss`] tagged with this generation,
/// so a supervisor that has already moved on can ignore it.
pub(crate) fn spawn_reader(
    reader: BufReader<OwnedReadHalf>,
    engine: Arc<CommandEngine>,
    store: Arc<StateStore>,
    mode: ProtocolMode,
    supports_rf: bool,
    generation: u64,
    lost_tx: mpsc::Sender<LinkLoss>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = reader.lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    store.touch().await;
                    handle_line(&line, &engine, &store, mode, supports_rf).await;
                }
                Ok(None) => {
                    debug!("Reader: panel closed the connection");
                    break;
                }
                Err(e) => {
                    error!("Reader: read error: {}", e);
                    break;
                }
            }
        }
        engine.mark_disconnected();
        let _ = lost_tx.send(LinkLoss { generation }).await;
    })
}

async fn handle_line(
    line: &str,
    engine: &CommandEngine,
    store: &StateStore,
    mode: ProtocolMode,
    supports_rf: bool,
) {
    let message = parse_line(line, mode, supports_rf);

    if message == Message::Unrecognized {
        debug!("Unrecognized line from panel: {:?}", line);
        return;
    }
    trace!("Panel line {:?} -> {:?}", line, message);

    if message.is_command_reply() {
        let routed = engine
            .offer_reply(Reply {
                raw: line.trim().to_string(),
                message: message.clone(),
            })
            .await;
        if !routed {
            debug!("Unsolicited command reply: {:?}", line);
        }
    }

    // Acks that carry state (arm/disarm/bypass) flow into the store too,
    // exactly once and on this task, preserving socket order.
    store.apply(&message).await;
}
