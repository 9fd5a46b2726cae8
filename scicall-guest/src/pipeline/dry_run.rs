//! Pipeline that logs calls instead of moving media.
//!
//! Used when no media engine is linked and, built with
//! [`DryRunPipeline::recording`], as the test double. Clones share state,
//! so a caller can hand one clone to the session and inspect another.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::error::PipelineError;
use crate::pipeline::{
    BuiltLeg, ControlPoint, ControlRef, LegDescriptor, LegKind, Pipeline, PipelineHandle,
    PlayState, Property,
};

/// One recorded pipeline call.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineCall {
    Build(LegDescriptor),
    SetState(PipelineHandle, PlayState),
    SetProperty(ControlRef, Property),
    Teardown(PipelineHandle),
}

#[derive(Debug, Default)]
struct DryRunState {
    next_handle: u64,
    live: HashMap<PipelineHandle, LegKind>,
    properties: HashMap<ControlRef, Property>,
    record: bool,
    calls: Vec<PipelineCall>,
    fail_builds: HashSet<LegKind>,
    omitted: HashSet<(LegKind, ControlPoint)>,
}

impl DryRunState {
    fn record(&mut self, call: PipelineCall) {
        if self.record {
            self.calls.push(call);
        }
    }
}

/// Dry-run pipeline. Only live legs and their current properties are kept
/// unless it was built with [`DryRunPipeline::recording`].
#[derive(Debug, Clone, Default)]
pub struct DryRunPipeline {
    inner: Arc<Mutex<DryRunState>>,
}

impl DryRunPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// A pipeline that also keeps every call for [`calls`](Self::calls).
    pub fn recording() -> Self {
        let pipeline = Self::default();
        pipeline.inner.lock().record = true;
        pipeline
    }

    /// Make the next build of `kind` fail.
    pub fn fail_next_build(&self, kind: LegKind) {
        self.inner.lock().fail_builds.insert(kind);
    }

    /// Build `kind` legs without exposing `point`.
    pub fn omit_control(&self, kind: LegKind, point: ControlPoint) {
        self.inner.lock().omitted.insert((kind, point));
    }

    /// All recorded calls so far, oldest first.
    pub fn calls(&self) -> Vec<PipelineCall> {
        self.inner.lock().calls.clone()
    }

    /// Kinds of the legs currently built and not torn down.
    pub fn live_legs(&self) -> Vec<LegKind> {
        let mut legs: Vec<_> = self.inner.lock().live.values().copied().collect();
        legs.sort_by_key(|k| *k as u8);
        legs
    }

    /// Last value written to `point` on any live leg.
    pub fn property(&self, point: ControlPoint) -> Option<Property> {
        let state = self.inner.lock();
        state
            .properties
            .iter()
            .find(|(control, _)| control.point() == point && state.live.contains_key(&control.handle()))
            .map(|(_, value)| *value)
    }

    /// Number of recorded `Build` calls for `kind`.
    pub fn build_count(&self, kind: LegKind) -> usize {
        self.inner
            .lock()
            .calls
            .iter()
            .filter(|c| matches!(c, PipelineCall::Build(d) if d.kind() == kind))
            .count()
    }
}

fn control_points(descriptor: &LegDescriptor) -> Vec<ControlPoint> {
    match descriptor {
        LegDescriptor::Outbound(_) => vec![
            ControlPoint::MicVolume,
            ControlPoint::MicMute,
            ControlPoint::Camera,
            ControlPoint::CameraBlend,
            ControlPoint::PlaceholderBlend,
        ],
        LegDescriptor::Feedback(_) => Vec::new(),
        LegDescriptor::FastFeedbackMix(mix) => {
            let mut points = vec![ControlPoint::MonitorMute, ControlPoint::MonitorVolume];
            points.extend(mix.sources.iter().map(|s| ControlPoint::Mix(s.role, s.index)));
            points
        }
    }
}

impl Pipeline for DryRunPipeline {
    fn build(&mut self, descriptor: &LegDescriptor) -> Result<BuiltLeg, PipelineError> {
        let kind = descriptor.kind();
        let mut state = self.inner.lock();
        state.record(PipelineCall::Build(descriptor.clone()));

        if state.fail_builds.remove(&kind) {
            warn!("[Pipeline] Refusing to build {:?} leg", kind);
            return Err(PipelineError::BuildFailed {
                leg: kind,
                reason: "dry run: build failure requested".to_string(),
            });
        }

        state.next_handle += 1;
        let handle = PipelineHandle(state.next_handle);
        state.live.insert(handle, kind);

        let controls = control_points(descriptor)
            .into_iter()
            .filter(|point| !state.omitted.contains(&(kind, *point)))
            .map(|point| ControlRef::new(handle, point))
            .collect();

        info!("[Pipeline] Built {:?} leg as {:?}", kind, handle);
        debug!("[Pipeline] {:?}", descriptor);
        Ok(BuiltLeg {
            kind,
            handle,
            controls,
        })
    }

    fn set_state(&mut self, handle: PipelineHandle, play: PlayState) -> Result<(), PipelineError> {
        let mut state = self.inner.lock();
        state.record(PipelineCall::SetState(handle, play));

        match state.live.get(&handle) {
            Some(kind) => {
                info!("[Pipeline] {:?} ({:?}) -> {:?}", handle, kind, play);
                Ok(())
            }
            None => Err(PipelineError::StateChange {
                leg: LegKind::Outbound,
                reason: format!("unknown handle {:?}", handle),
            }),
        }
    }

    fn set_property(&mut self, control: &ControlRef, property: Property) -> Result<(), PipelineError> {
        let mut state = self.inner.lock();
        state.record(PipelineCall::SetProperty(*control, property));

        if !state.live.contains_key(&control.handle()) {
            return Err(PipelineError::Property {
                point: control.point(),
                reason: format!("unknown handle {:?}", control.handle()),
            });
        }

        debug!("[Pipeline] {:?} = {:?}", control.point(), property);
        state.properties.insert(*control, property);
        Ok(())
    }

    fn teardown(&mut self, handle: PipelineHandle) {
        let mut state = self.inner.lock();
        state.record(PipelineCall::Teardown(handle));

        if let Some(kind) = state.live.remove(&handle) {
            state.properties.retain(|control, _| control.handle() != handle);
            info!("[Pipeline] Tore down {:?} leg ({:?})", kind, handle);
        }
    }
}
