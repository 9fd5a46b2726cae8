//! Guest session: state machine, mix registry and the task that runs them.

pub mod controller;
pub mod mixer;
pub mod state;

use std::fmt;
use std::net::SocketAddr;

use log::{debug, info};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use scicall_protocol::{ConnectError, Port};

use crate::error::{PipelineError, SessionError};
use crate::pipeline::{LegKind, Pipeline};

pub use controller::{DeferredAction, SessionConfig, SessionController, SessionEvent, UserAction};
pub use mixer::{slider_gain, MixLeg, MixLegRegistry, MixRole};
pub use state::{ConnectionState, LegStates, StreamState, Topology, DEFAULT_LATENCY_MS};

/// Things the operator should hear about.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Connected { peer: Option<SocketAddr> },
    ConnectFailed(ConnectError),
    /// The station reports another guest on this channel.
    ChannelOccupied,
    LegStarted(LegKind),
    LegFailed { leg: LegKind, error: PipelineError },
    Disconnected { reason: String },
    RestartRequested,
    ActionRejected(SessionError),
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Connected { peer: Some(peer) } => write!(f, "Connected to station at {}", peer),
            Notice::Connected { peer: None } => write!(f, "Connected to station"),
            Notice::ConnectFailed(e) => write!(f, "Could not connect to the station: {}", e),
            Notice::ChannelOccupied => {
                write!(f, "This channel seems to be in use by another guest, try another one")
            }
            Notice::LegStarted(leg) => write!(f, "{:?} stream started", leg),
            Notice::LegFailed { leg, error } => write!(f, "{:?} stream failed: {}", leg, error),
            Notice::Disconnected { reason } => write!(f, "Disconnected: {}", reason),
            Notice::RestartRequested => write!(f, "Station requested a restart, reconnecting"),
            Notice::ActionRejected(e) => write!(f, "{}", e),
        }
    }
}

/// One mix leg as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MixLegSnapshot {
    pub role: MixRole,
    pub index: usize,
    pub volume: f64,
    pub port: Port,
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub connection: ConnectionState,
    pub epoch: u64,
    pub legs: LegStates,
    pub topology: Option<Topology>,
    pub latency_ms: u32,
    pub video_enabled: bool,
    pub audio_enabled: bool,
    pub monitor_enabled: bool,
    pub mic_gain: f64,
    pub monitor_gain: f64,
    pub mix_legs: Vec<MixLegSnapshot>,
}

/// Handle to a session running on its own task.
///
/// Dropping the handle stops the session and tears it down.
pub struct SessionHandle {
    events: mpsc::UnboundedSender<SessionEvent>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Start a session. Notices are delivered on the returned receiver.
    pub fn spawn<P: Pipeline>(
        config: SessionConfig,
        pipeline: P,
    ) -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (events, rx) = mpsc::unbounded_channel();
        let (notice_tx, notices) = mpsc::unbounded_channel();
        let controller = SessionController::new(config, pipeline, events.downgrade(), notice_tx);
        let task = tokio::spawn(run_session(controller, rx));
        (Self { events, task }, notices)
    }

    pub fn act(&self, action: UserAction) -> Result<(), SessionError> {
        self.events
            .send(SessionEvent::User(action))
            .map_err(|_| SessionError::SessionGone)
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.events
            .send(SessionEvent::Snapshot(tx))
            .map_err(|_| SessionError::SessionGone)?;
        rx.await.map_err(|_| SessionError::SessionGone)
    }

    /// Tear the session down and wait for its task to finish.
    pub async fn shutdown(self) {
        let _ = self.events.send(SessionEvent::Shutdown);
        if let Err(e) = self.task.await {
            debug!("[Session] Task ended abnormally: {}", e);
        }
    }
}

async fn run_session<P: Pipeline>(
    mut controller: SessionController<P>,
    mut rx: mpsc::UnboundedReceiver<SessionEvent>,
) {
    info!("[Session] Started");
    while let Some(event) = rx.recv().await {
        if !controller.handle(event) {
            break;
        }
    }
    controller.disconnect();
    info!("[Session] Stopped");
}
