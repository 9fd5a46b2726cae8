//! Error types for the scicall control protocol.

use std::time::Duration;

use thiserror::Error;

/// Protocol-level errors raised while encoding or decoding control messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The line is not a JSON object with a string `cmd` field, or a known
    /// command is missing required fields.
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// The `cmd` tag is well-formed but not part of the vocabulary.
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// A single line exceeded the decoder limit.
    #[error("Line too long: {len} bytes (max: {max})")]
    LineTooLong { len: usize, max: usize },

    /// Failed to encode a command.
    #[error("Failed to encode command: {0}")]
    EncodeError(String),
}

impl ProtocolError {
    /// Malformed input counts against the connection; unknown commands do not.
    pub fn is_malformed(&self) -> bool {
        matches!(self, ProtocolError::Malformed(_) | ProtocolError::LineTooLong { .. })
    }
}

/// Errors surfaced when the control connection cannot be established.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// The station refused the connection or the address is unusable.
    #[error("Station unreachable: {0}")]
    Unreachable(String),

    /// The connection attempt did not complete in time.
    #[error("Connection timed out after {0:?}")]
    Timeout(Duration),
}
