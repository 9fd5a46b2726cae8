//! Media pipeline capability.
//!
//! The guest never touches media elements itself. It describes each leg,
//! asks the engine to build it, and then drives the typed control points the
//! engine hands back.

pub mod dry_run;

use scicall_protocol::Port;

use crate::error::PipelineError;
use crate::session::MixRole;

pub use dry_run::{DryRunPipeline, PipelineCall};

/// The three independently startable media flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LegKind {
    /// Camera and microphone capture sent to the station.
    Outbound,
    /// Program video returned by the station.
    Feedback,
    /// Per-source feedback audio summed into one monitored signal.
    FastFeedbackMix,
}

/// Engine-side play state of a built leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    Stopped,
    Playing,
}

/// Opaque handle of a built leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineHandle(pub u64);

/// Named control points a leg exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlPoint {
    /// Outbound microphone gain.
    MicVolume,
    /// Outbound microphone on/off gain.
    MicMute,
    /// Live camera branch.
    Camera,
    /// Compositor input carrying the camera.
    CameraBlend,
    /// Compositor input carrying the "no signal" placeholder.
    PlaceholderBlend,
    /// Local monitor on/off gain of the feedback mix.
    MonitorMute,
    /// Local monitor gain of the feedback mix.
    MonitorVolume,
    /// Gain of one inbound mix source.
    Mix(MixRole, usize),
}

/// Typed reference to a control point of a built leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControlRef {
    handle: PipelineHandle,
    point: ControlPoint,
}

impl ControlRef {
    pub fn new(handle: PipelineHandle, point: ControlPoint) -> Self {
        Self { handle, point }
    }

    pub fn handle(&self) -> PipelineHandle {
        self.handle
    }

    pub fn point(&self) -> ControlPoint {
        self.point
    }
}

/// Property writes understood by control points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Property {
    /// Linear gain, `0.0..=2.0`.
    Volume(f64),
    /// Compositor blend weight, `0.0..=1.0`.
    Alpha(f64),
    /// Whether a source branch is running.
    Active(bool),
}

/// Where an inbound leg receives from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Pull from the station.
    Remote(String),
    /// Listen locally (self-test).
    Listen,
}

/// Outbound capture leg: camera composited with a placeholder, microphone
/// through two gain stages, each sent to the station and monitored locally.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundDescriptor {
    pub host: String,
    pub video_port: Port,
    pub audio_port: Port,
    pub latency_ms: u32,
    pub video_device: Option<String>,
    pub audio_device: Option<String>,
    pub hardware_acceleration: bool,
}

/// Feedback video leg: one inbound decode and display branch.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackDescriptor {
    pub source: Endpoint,
    pub video_port: Port,
    pub latency_ms: u32,
    pub hardware_acceleration: bool,
}

/// One inbound source of the feedback mix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MixSource {
    pub role: MixRole,
    pub index: usize,
    pub port: Port,
}

/// Feedback mix leg: every source through its own gain into one adder.
#[derive(Debug, Clone, PartialEq)]
pub struct MixDescriptor {
    pub host: String,
    pub sources: Vec<MixSource>,
    pub latency_ms: u32,
}

/// Everything the engine needs to build one leg.
#[derive(Debug, Clone, PartialEq)]
pub enum LegDescriptor {
    Outbound(OutboundDescriptor),
    Feedback(FeedbackDescriptor),
    FastFeedbackMix(MixDescriptor),
}

impl LegDescriptor {
    pub fn kind(&self) -> LegKind {
        match self {
            LegDescriptor::Outbound(_) => LegKind::Outbound,
            LegDescriptor::Feedback(_) => LegKind::Feedback,
            LegDescriptor::FastFeedbackMix(_) => LegKind::FastFeedbackMix,
        }
    }
}

/// A leg the engine has constructed but not yet started.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltLeg {
    pub kind: LegKind,
    pub handle: PipelineHandle,
    pub controls: Vec<ControlRef>,
}

impl BuiltLeg {
    /// Resolve a control point exposed by this leg.
    pub fn control(&self, point: ControlPoint) -> Result<ControlRef, PipelineError> {
        self.controls
            .iter()
            .copied()
            .find(|c| c.point() == point)
            .ok_or(PipelineError::MissingControl {
                leg: self.kind,
                point,
            })
    }
}

/// The media engine as seen by the session.
pub trait Pipeline: Send + 'static {
    /// Construct a leg. The leg stays stopped until `set_state`.
    fn build(&mut self, descriptor: &LegDescriptor) -> Result<BuiltLeg, PipelineError>;

    /// Change the play state of a built leg.
    fn set_state(&mut self, handle: PipelineHandle, state: PlayState) -> Result<(), PipelineError>;

    /// Write one property of a control point.
    fn set_property(&mut self, control: &ControlRef, property: Property) -> Result<(), PipelineError>;

    /// Stop and release a leg. Unknown handles are ignored.
    fn teardown(&mut self, handle: PipelineHandle);
}
