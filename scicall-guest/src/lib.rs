//! scicall guest: joins a remote station over a control connection and
//! runs the outbound, feedback and feedback-mix media legs it asks for.
//!
//! A session runs on its own task behind a [`SessionHandle`]. Operator
//! actions go in through [`SessionHandle::act`], and [`Notice`]s come out
//! on the receiver returned by [`SessionHandle::spawn`]. Media work goes
//! through the [`Pipeline`] capability.

pub mod client;
pub mod config;
pub mod console;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod session;

pub use config::{load_config, GuestConfig};
pub use error::{ConfigError, PipelineError, SessionError};
pub use pipeline::{DryRunPipeline, LegKind, Pipeline};
pub use session::{
    ConnectionState, Notice, SessionConfig, SessionHandle, SessionSnapshot, StreamState, Topology,
    UserAction,
};
