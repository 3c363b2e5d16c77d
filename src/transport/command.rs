// MIT License - Copyright (c) 2026 Peter Wright

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex, oneshot};
use tokio::time::{Duration, timeout};
use tracing::{debug, error};

use crate::error::{ArrowheadError, Result};
use crate::message::Message;
use crate::protocol::Command;

/// A routed command reply: the raw line plus its classification.
#[derive(Debug, Clone)]
pub struct Reply {
    pub raw: String,
    pub message: Message,
}

/// Serializes commands onto the socket and routes acknowledgements back.
///
/// The protocol has no request ids, so at most one command may be in flight:
/// `gate` is a fair mutex, which both enforces the single-outstanding
/// invariant and queues concurrent submitters in FIFO order. The reader task
/// hands each command-reply line to [`offer_reply`]; with a single command
/// outstanding, the pending slot is always the right recipient.
pub struct CommandEngine {
    writer: Mutex<OwnedWriteHalf>,
    gate: Mutex<()>,
    pending: Mutex<Option<oneshot::Sender<Reply>>>,
    command_timeout: Duration,
    connected: AtomicBool,
}

impl CommandEngine {
    pub fn new(writer: OwnedWriteHalf, command_timeout: Duration) -> Self {
        Self {
            writer: Mutex::new(writer),
            gate: Mutex::new(()),
            pending: Mutex::new(None),
            command_timeout,
            connected: AtomicBool::new(true),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Send a command; wait for its acknowledgement when it expects one.
    ///
    /// Returns the routed reply message, or `None` for fire-and-forget
    /// commands (which resolve once the line is flushed to the socket).
    pub async fn send(&self, command: &Command) -> Result<Option<Message>> {
        Ok(self.send_raw(command).await?.map(|reply| reply.message))
    }

    /// Like [`send`](Self::send), but keeps the raw reply line (used by the
    /// custom-command escape hatch).
    pub async fn send_raw(&self, command: &Command) -> Result<Option<Reply>> {
        let wire = command.to_wire_string();

        let _in_flight = self.gate.lock().await;
        if !self.is_connected() {
            return Err(ArrowheadError::NotConnected);
        }

        debug!("Sending command: {}", wire);

        if !command.expects_response() {
            self.write_line(&wire).await?;
            return Ok(None);
        }

        let (tx, rx) = oneshot::channel();
        *self.pending.lock().await = Some(tx);

        if let Err(e) = self.write_line(&wire).await {
            *self.pending.lock().await = None;
            return Err(e);
        }

        match timeout(self.command_timeout, rx).await {
            Ok(Ok(reply)) => {
                debug!("Reply for '{}': {}", wire, reply.raw);
                Ok(Some(reply))
            }
            Ok(Err(_)) => {
                // Sender dropped: the connection was torn down underneath us
                Err(ArrowheadError::ConnectionLost)
            }
            Err(_) => {
                *self.pending.lock().await = None;
                debug!("Command timeout: {}", wire);
                Err(ArrowheadError::CommandTimeout { command: wire })
            }
        }
    }

    /// Route a command-reply line to the waiting sender, if any. Returns
    /// false when no command is pending (a late reply after a timeout, or
    /// an ack the panel volunteered).
    pub(crate) async fn offer_reply(&self, reply: Reply) -> bool {
        match self.pending.lock().await.take() {
            Some(tx) => tx.send(reply).is_ok(),
            None => false,
        }
    }

    async fn write_line(&self, line: &str) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer
            .write_all(format!("{}\n", line).as_bytes())
            .await
            .map_err(|e| {
                error!("Failed to write command: {}", e);
                self.mark_disconnected();
                ArrowheadError::Io(e)
            })?;
        writer.flush().await.map_err(ArrowheadError::Io)?;
        Ok(())
    }

    /// Tear the engine down: fail the pending command (its sender is
    /// dropped, surfacing `ConnectionLost`) and close the write half.
    pub(crate) async fn shutdown(&self) {
        self.mark_disconnected();
        *self.pending.lock().await = None;
        let _ = self.writer.lock().await.shutdown().await;
    }
}
