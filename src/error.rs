// MIT License - Copyright (c) 2026 Peter Wright

use crate::protocol::ProtocolMode;

/// All errors that can occur in the arrowhead-lan-bridge library.
#[derive(Debug, thiserror::Error)]
pub enum ArrowheadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection timeout")]
    ConnectionTimeout,

    #[error("Not connected to panel")]
    NotConnected,

    #[error("Connection lost")]
    ConnectionLost,

    #[error("Authentication failed: {reason}")]
    Auth { reason: String },

    #[error("Command timeout: {command}")]
    CommandTimeout { command: String },

    #[error("Panel rejected command '{command}': {response}")]
    CommandRejected { command: String, response: String },

    #[error("Protocol error: unexpected line '{line}'")]
    Protocol { line: String },

    #[error("Operation requires MODE 4 but session negotiated {mode}")]
    UnsupportedOperation { mode: ProtocolMode },

    #[error("Invalid area id {id} (valid: 1-{max})")]
    InvalidArea { id: u32, max: u32 },

    #[error("Invalid zone id {id} (valid: 1-{max})")]
    InvalidZone { id: u32, max: u32 },

    #[error("Invalid output id {id} (valid: 1-{max})")]
    InvalidOutput { id: u32, max: u32 },

    #[error("Invalid user code: {reason}")]
    InvalidUserCode { reason: String },

    #[error("Topology detection failed: {reason}")]
    Detection { reason: String },

    #[error("Channel closed")]
    ChannelClosed,
}

impl ArrowheadError {
    /// Whether this error is transient and the connection should be retried.
    ///
    /// `Auth` is deliberately not retryable: the panel rejected our
    /// credentials, and hammering it with the same ones only locks the port.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ArrowheadError::Io(_)
                | ArrowheadError::ConnectionTimeout
                | ArrowheadError::ConnectionLost
                | ArrowheadError::NotConnected
                | ArrowheadError::CommandTimeout { .. }
                | ArrowheadError::ChannelClosed
        )
    }
}

pub type Result<T> = std::result::Result<T, ArrowheadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ArrowheadError::ConnectionTimeout.is_retryable());
        assert!(ArrowheadError::ConnectionLost.is_retryable());
        assert!(
            ArrowheadError::CommandTimeout {
                command: "STATUS".into()
            }
            .is_retryable()
        );
        assert!(
            !ArrowheadError::Auth {
                reason: "bad password".into()
            }
            .is_retryable()
        );
        assert!(
            !ArrowheadError::UnsupportedOperation {
                mode: ProtocolMode::Mode1
            }
            .is_retryable()
        );
        assert!(!ArrowheadError::InvalidArea { id: 33, max: 32 }.is_retryable());
    }
}
