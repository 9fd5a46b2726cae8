//! Error types for the guest session.

use thiserror::Error;

use scicall_protocol::ConnectError;

use crate::pipeline::{ControlPoint, LegKind};
use crate::session::{ConnectionState, MixRole, StreamState};

/// Failures reported by the media pipeline capability.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// The engine could not construct the leg.
    #[error("Failed to build {leg:?} leg: {reason}")]
    BuildFailed { leg: LegKind, reason: String },

    /// The engine built the leg but did not expose a required control point.
    #[error("{leg:?} leg has no control point {point:?}")]
    MissingControl { leg: LegKind, point: ControlPoint },

    /// A state change on a built leg failed.
    #[error("Failed to change state of {leg:?} leg: {reason}")]
    StateChange { leg: LegKind, reason: String },

    /// A property write was rejected.
    #[error("Failed to set {point:?}: {reason}")]
    Property { point: ControlPoint, reason: String },
}

/// Errors returned by session operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    /// The operation is not valid in the current state.
    #[error("Cannot {action} while {state:?}")]
    InvalidTransition {
        action: &'static str,
        state: ConnectionState,
    },

    /// A leg lifecycle step out of order.
    #[error("{leg:?} leg cannot go from {from:?} to {to:?}")]
    LegTransition {
        leg: LegKind,
        from: StreamState,
        to: StreamState,
    },

    /// The leg the operation needs is not running.
    #[error("Cannot {action}: {leg:?} leg is not active")]
    LegNotActive { action: &'static str, leg: LegKind },

    /// A mix leg index outside the negotiated topology.
    #[error("No {role:?} mix leg {index} (have {count})")]
    MixIndexOutOfRange {
        role: MixRole,
        index: usize,
        count: usize,
    },

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// The control channel is closed.
    #[error("Control channel closed")]
    ChannelClosed,

    /// The session task has stopped.
    #[error("Session is gone")]
    SessionGone,
}

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Channel numbers are 1-based and bounded by the port plan.
    #[error("Channel {channel} is out of range (1..={max})")]
    InvalidChannel { channel: u32, max: u32 },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}
