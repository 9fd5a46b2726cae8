//! Session state machine.
//!
//! A [`SessionController`] owns everything about one guest: the control
//! channel, the keepalive timer, the three media legs and the mix registry.
//! It is driven by [`SessionEvent`]s from a single task, so none of its
//! state needs locking. Work that has to wait (connecting, settle delays,
//! reconnects) runs in spawned tasks that post their result back as another
//! event tagged with the epoch it was started under. Every full teardown
//! bumps the epoch, so results that arrive after a teardown are dropped.

use std::time::Duration;

use log::{debug, error, info, trace, warn};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

use scicall_protocol::{ChannelPort, Command, ConnectError, Port, PortAllocator, ProtocolError};

use crate::client::{ChannelEvent, ControlChannel, KeepAliveMonitor};
use crate::error::{PipelineError, SessionError};
use crate::pipeline::{
    BuiltLeg, ControlPoint, ControlRef, Endpoint, FeedbackDescriptor, LegDescriptor, LegKind,
    MixDescriptor, MixSource, OutboundDescriptor, Pipeline, PipelineHandle, PlayState, Property,
};
use crate::session::mixer::{slider_gain, MixLeg, MixLegRegistry, MixRole, DEFAULT_MIX_VOLUME};
use crate::session::state::{ConnectionState, LegStates, StreamState, Topology, DEFAULT_LATENCY_MS};
use crate::session::{MixLegSnapshot, Notice, SessionSnapshot};

const LOOPBACK_HOST: &str = "127.0.0.1";

/// Runtime settings of a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Station host name or address.
    pub station: String,
    /// Zero-based channel on the station.
    pub channel: u32,
    pub ports: PortAllocator,
    pub connect_timeout: Duration,
    pub keepalive_interval: Duration,
    /// Pause between a start command and building the leg.
    pub settle_delay: Duration,
    /// Pause between a remote restart and reconnecting.
    pub reconnect_delay: Duration,
    pub latency_ms: u32,
    /// Malformed lines in a row that end the session.
    pub max_consecutive_malformed: u32,
    pub video_device: Option<String>,
    pub audio_device: Option<String>,
    pub hardware_acceleration: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            station: "localhost".to_string(),
            channel: 0,
            ports: PortAllocator::default(),
            connect_timeout: Duration::from_millis(400),
            keepalive_interval: crate::client::KEEPALIVE_INTERVAL,
            settle_delay: Duration::from_millis(200),
            reconnect_delay: Duration::from_millis(1000),
            latency_ms: DEFAULT_LATENCY_MS,
            max_consecutive_malformed: 8,
            video_device: None,
            audio_device: None,
            hardware_acceleration: false,
        }
    }
}

/// Requests coming from the operator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UserAction {
    ToggleConnect,
    Connect,
    Disconnect,
    ToggleVideo,
    ToggleAudio,
    ToggleMonitor,
    /// Raw microphone slider position, `0..=2000`.
    MicVolume(i32),
    /// Raw monitor slider position, `0..=2000`.
    MonitorVolume(i32),
    SelfTest,
}

/// Work that was postponed by the controller itself.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeferredAction {
    StartCommon,
    StartFeedback(Topology),
    Reconnect,
}

/// Everything the session task reacts to.
#[derive(Debug)]
pub enum SessionEvent {
    User(UserAction),
    Channel { epoch: u64, event: ChannelEvent },
    Tick { epoch: u64 },
    ConnectFinished {
        epoch: u64,
        result: Result<TcpStream, ConnectError>,
    },
    Deferred { epoch: u64, action: DeferredAction },
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
struct OutboundLeg {
    handle: PipelineHandle,
    mic_volume: ControlRef,
    mic_mute: ControlRef,
    camera: ControlRef,
    camera_blend: ControlRef,
    placeholder_blend: ControlRef,
}

#[derive(Debug, Clone, Copy)]
struct MixBus {
    handle: PipelineHandle,
    monitor_mute: ControlRef,
    monitor_volume: ControlRef,
}

fn gain_switch(on: bool) -> Property {
    Property::Volume(if on { 1.0 } else { 0.0 })
}

/// One guest session.
pub struct SessionController<P: Pipeline> {
    config: SessionConfig,
    pipeline: P,
    events: mpsc::WeakUnboundedSender<SessionEvent>,
    notices: mpsc::UnboundedSender<Notice>,

    connection: ConnectionState,
    epoch: u64,
    control: Option<ControlChannel>,
    keepalive: Option<KeepAliveMonitor>,
    malformed_streak: u32,

    legs: LegStates,
    topology: Option<Topology>,
    latency_ms: u32,
    outbound: Option<OutboundLeg>,
    feedback: Option<PipelineHandle>,
    mix: Option<MixBus>,
    registry: MixLegRegistry,

    video_enabled: bool,
    audio_enabled: bool,
    monitor_enabled: bool,
    mic_gain: f64,
    monitor_gain: f64,
}

impl<P: Pipeline> SessionController<P> {
    pub fn new(
        config: SessionConfig,
        pipeline: P,
        events: mpsc::WeakUnboundedSender<SessionEvent>,
        notices: mpsc::UnboundedSender<Notice>,
    ) -> Self {
        let latency_ms = config.latency_ms;
        Self {
            config,
            pipeline,
            events,
            notices,
            connection: ConnectionState::Idle,
            epoch: 0,
            control: None,
            keepalive: None,
            malformed_streak: 0,
            legs: LegStates::default(),
            topology: None,
            latency_ms,
            outbound: None,
            feedback: None,
            mix: None,
            registry: MixLegRegistry::new(),
            video_enabled: true,
            audio_enabled: true,
            monitor_enabled: true,
            mic_gain: 1.0,
            monitor_gain: 1.0,
        }
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn legs(&self) -> LegStates {
        self.legs
    }

    pub fn registry(&self) -> &MixLegRegistry {
        &self.registry
    }

    /// Handle one event. Returns `false` once the session should stop.
    pub fn handle(&mut self, event: SessionEvent) -> bool {
        match event {
            SessionEvent::User(action) => self.user_action(action),
            SessionEvent::Channel { epoch, event } => {
                if self.is_current(epoch, "channel event") {
                    self.on_channel_event(event);
                }
            }
            SessionEvent::Tick { epoch } => {
                if self.is_current(epoch, "keepalive tick") {
                    self.on_tick();
                }
            }
            SessionEvent::ConnectFinished { epoch, result } => {
                if self.is_current(epoch, "connect result") {
                    self.on_connect_finished(result);
                }
            }
            SessionEvent::Deferred { epoch, action } => {
                if self.is_current(epoch, "deferred action") {
                    self.on_deferred(action);
                }
            }
            SessionEvent::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            SessionEvent::Shutdown => {
                self.disconnect();
                return false;
            }
        }
        true
    }

    fn is_current(&self, epoch: u64, what: &str) -> bool {
        if epoch != self.epoch {
            debug!("[Session] Dropping stale {} (epoch {} < {})", what, epoch, self.epoch);
            return false;
        }
        true
    }

    fn notify(&self, notice: Notice) {
        let _ = self.notices.send(notice);
    }

    /// Post `action` back to the session after `delay`, tagged with the
    /// current epoch.
    fn schedule(&self, action: DeferredAction, delay: Duration) {
        let epoch = self.epoch;
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = events.upgrade() {
                let _ = tx.send(SessionEvent::Deferred { epoch, action });
            }
        });
    }

    // ------------------------------------------------------------------
    // Operator actions
    // ------------------------------------------------------------------

    pub fn user_action(&mut self, action: UserAction) {
        debug!("[Session] User action {:?}", action);
        let result = match action {
            UserAction::ToggleConnect => self.user_toggle_connect(),
            UserAction::Connect => self.connect(),
            UserAction::Disconnect => {
                self.disconnect();
                Ok(())
            }
            UserAction::ToggleVideo => self.toggle_video_input().map(|_| ()),
            UserAction::ToggleAudio => self.toggle_audio_input().map(|_| ()),
            UserAction::ToggleMonitor => self.toggle_feedback_audio_output().map(|_| ()),
            UserAction::MicVolume(raw) => self.set_mic_volume(raw).map(|_| ()),
            UserAction::MonitorVolume(raw) => self.set_monitor_volume(raw).map(|_| ()),
            UserAction::SelfTest => self.toggle_self_test(),
        };

        if let Err(e) = result {
            warn!("[Session] {:?} rejected: {}", action, e);
            self.notify(Notice::ActionRejected(e));
        }
    }

    /// Connect when idle, disconnect when connected or streaming. A toggle
    /// while a connect is in flight changes nothing.
    pub fn user_toggle_connect(&mut self) -> Result<(), SessionError> {
        if self.connection == ConnectionState::Connected || self.legs.any_active() {
            self.disconnect();
            return Ok(());
        }
        self.connect()
    }

    /// Start connecting to the station. The result arrives later as
    /// [`SessionEvent::ConnectFinished`].
    pub fn connect(&mut self) -> Result<(), SessionError> {
        match self.connection {
            ConnectionState::Connecting | ConnectionState::Connected => {
                debug!("[Session] Connect ignored while {:?}", self.connection);
                return Ok(());
            }
            ConnectionState::Idle | ConnectionState::Disconnected => {}
        }
        if self.legs.any_active() {
            return Err(SessionError::InvalidTransition {
                action: "connect with media running",
                state: self.connection,
            });
        }

        // Nothing runs, so a topology left here belongs to an earlier session.
        self.topology = None;
        self.registry.clear();

        let host = self.config.station.clone();
        let port = self.config.ports.control(self.config.channel);
        let timeout = self.config.connect_timeout;
        let epoch = self.epoch;
        let events = self.events.clone();

        info!("[Session] Connecting to {}:{} (channel {})", host, port, self.config.channel + 1);
        self.connection = ConnectionState::Connecting;

        tokio::spawn(async move {
            let result = ControlChannel::connect(&host, port, timeout).await;
            if let Some(tx) = events.upgrade() {
                let _ = tx.send(SessionEvent::ConnectFinished { epoch, result });
            }
        });
        Ok(())
    }

    /// Full teardown back to idle. Always allowed, always wins.
    pub fn disconnect(&mut self) {
        self.teardown(ConnectionState::Idle, "disconnected by user");
    }

    fn teardown(&mut self, next: ConnectionState, reason: &str) {
        self.epoch += 1;

        if let Some(keepalive) = self.keepalive.take() {
            keepalive.stop();
        }
        if let Some(mut control) = self.control.take() {
            control.disconnect();
        }
        self.stop_streams();

        let was = self.connection;
        self.connection = next;
        self.malformed_streak = 0;

        if was != next || was == ConnectionState::Connected {
            info!("[Session] {:?} -> {:?}: {}", was, next, reason);
        }
        if was == ConnectionState::Connected {
            self.notify(Notice::Disconnected {
                reason: reason.to_string(),
            });
        }
    }

    fn stop_streams(&mut self) {
        if let Some(leg) = self.outbound.take() {
            self.release(leg.handle);
        }
        if let Some(handle) = self.feedback.take() {
            self.release(handle);
        }
        if let Some(bus) = self.mix.take() {
            self.release(bus.handle);
        }
        self.legs = LegStates::default();
        self.registry.clear();
        self.topology = None;
        self.video_enabled = true;
        self.audio_enabled = true;
        self.monitor_enabled = true;
    }

    fn release(&mut self, handle: PipelineHandle) {
        if let Err(e) = self.pipeline.set_state(handle, PlayState::Stopped) {
            warn!("[Pipeline] Could not stop {:?}: {}", handle, e);
        }
        self.pipeline.teardown(handle);
    }

    // ------------------------------------------------------------------
    // Control channel
    // ------------------------------------------------------------------

    fn on_connect_finished(&mut self, result: Result<TcpStream, ConnectError>) {
        if self.connection != ConnectionState::Connecting {
            debug!("[Session] Connect result while {:?}, dropping", self.connection);
            return;
        }

        let stream = match result {
            Ok(stream) => stream,
            Err(e) => {
                warn!("[Session] Could not reach station: {}", e);
                self.connection = ConnectionState::Idle;
                self.notify(Notice::ConnectFailed(e));
                return;
            }
        };

        let epoch = self.epoch;
        let events = self.events.clone();
        let channel = ControlChannel::attach(stream, move |event| {
            if let Some(tx) = events.upgrade() {
                let _ = tx.send(SessionEvent::Channel { epoch, event });
            }
        });
        let peer = channel.peer();

        let events = self.events.clone();
        let keepalive = KeepAliveMonitor::start(self.config.keepalive_interval, move || {
            match events.upgrade() {
                Some(tx) => tx.send(SessionEvent::Tick { epoch }).is_ok(),
                None => false,
            }
        });

        self.control = Some(channel);
        self.keepalive = Some(keepalive);
        self.connection = ConnectionState::Connected;
        self.malformed_streak = 0;

        info!("[Session] Connected to station {:?}", peer);
        self.notify(Notice::Connected { peer });
    }

    fn on_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Inbound(Ok(cmd)) => {
                self.malformed_streak = 0;
                self.handle_command(cmd);
            }
            ChannelEvent::Inbound(Err(e)) => self.on_bad_line(e),
            ChannelEvent::Closed(reason) => {
                if self.connection == ConnectionState::Connected {
                    self.teardown(ConnectionState::Disconnected, &reason);
                }
            }
        }
    }

    fn on_bad_line(&mut self, e: ProtocolError) {
        if !e.is_malformed() {
            info!("[Control] Ignoring message: {}", e);
            self.malformed_streak = 0;
            return;
        }

        self.malformed_streak += 1;
        warn!(
            "[Control] Malformed message ({} in a row): {}",
            self.malformed_streak, e
        );
        if self.malformed_streak >= self.config.max_consecutive_malformed {
            error!("[Control] Too many malformed messages, dropping connection");
            self.teardown(ConnectionState::Disconnected, "too many malformed messages");
        }
    }

    fn on_tick(&mut self) {
        if self.connection == ConnectionState::Connected {
            self.send(Command::keepalive_for(self.config.channel));
        }
    }

    fn send(&mut self, cmd: Command) {
        let result = match &self.control {
            Some(control) => control.send(cmd),
            None => Err(SessionError::ChannelClosed),
        };
        if let Err(e) = result {
            error!("[Control] Send failed: {}", e);
            if self.connection == ConnectionState::Connected {
                self.teardown(ConnectionState::Disconnected, "send failed");
            }
        }
    }

    /// React to one station command.
    pub fn handle_command(&mut self, cmd: Command) {
        trace!("[Control] Received {:?}", cmd);
        match cmd {
            Command::HelloFromServer => {
                info!("[Control] Station said hello");
                self.send(Command::HelloFromGuest);
            }
            Command::HelloFromGuest => {
                debug!("[Control] Unexpected hello_from_guest from station");
            }
            Command::StartCommonStream => {
                self.schedule(DeferredAction::StartCommon, self.config.settle_delay);
            }
            Command::StartFeedbackStream {
                count_of_guests,
                count_of_externals,
            } => {
                let topology = Topology::negotiated(count_of_guests, count_of_externals);
                self.schedule(DeferredAction::StartFeedback(topology), self.config.settle_delay);
            }
            Command::SetSrtLatency { data } => {
                info!("[Control] Latency set to {} ms", data);
                self.latency_ms = data;
            }
            Command::ClientCollision => {
                warn!("[Control] Channel {} is occupied", self.config.channel + 1);
                self.notify(Notice::ChannelOccupied);
            }
            Command::RemoteRestart => self.remote_restart(),
            Command::SetVolumes {
                guest_channels,
                external_channels,
            } => {
                if let Err(e) = self.set_mix_volumes(&guest_channels, &external_channels) {
                    warn!("[Control] set_volumes not fully applied: {}", e);
                }
            }
            Command::Keepalive { .. } => {}
        }
    }

    fn remote_restart(&mut self) {
        info!(
            "[Session] Station requested restart, reconnecting in {:?}",
            self.config.reconnect_delay
        );
        self.notify(Notice::RestartRequested);
        self.teardown(ConnectionState::Idle, "restart requested by station");
        self.schedule(DeferredAction::Reconnect, self.config.reconnect_delay);
    }

    fn on_deferred(&mut self, action: DeferredAction) {
        let result = match action {
            DeferredAction::StartCommon => self.on_start_common(),
            DeferredAction::StartFeedback(topology) => self.on_start_feedback(topology),
            DeferredAction::Reconnect => match self.connection {
                ConnectionState::Idle | ConnectionState::Disconnected => self.connect(),
                _ => Ok(()),
            },
        };
        if let Err(e) = result {
            error!("[Session] {:?} failed: {}", action, e);
        }
    }

    // ------------------------------------------------------------------
    // Media legs
    // ------------------------------------------------------------------

    fn loopback(&self) -> bool {
        self.topology.map_or(false, |t| t.loopback)
    }

    fn media_host(&self, loopback: bool) -> String {
        if loopback {
            LOOPBACK_HOST.to_string()
        } else {
            self.config.station.clone()
        }
    }

    fn channel_port(&self, kind: ChannelPort) -> Port {
        self.config.ports.channel_port(self.config.channel, kind)
    }

    fn require_media_allowed(&self, action: &'static str, loopback: bool) -> Result<(), SessionError> {
        if loopback || self.connection == ConnectionState::Connected {
            Ok(())
        } else {
            Err(SessionError::InvalidTransition {
                action,
                state: self.connection,
            })
        }
    }

    /// Build and start the outbound capture leg. Does nothing when it is
    /// already running.
    pub fn on_start_common(&mut self) -> Result<(), SessionError> {
        let loopback = self.loopback();
        self.require_media_allowed("start outbound leg", loopback)?;
        if self.legs.outbound != StreamState::Stopped {
            debug!("[Session] Outbound leg already {:?}", self.legs.outbound);
            return Ok(());
        }

        self.legs.advance(LegKind::Outbound, StreamState::Starting)?;
        let descriptor = OutboundDescriptor {
            host: self.media_host(loopback),
            video_port: self.channel_port(ChannelPort::MediaVideo),
            audio_port: self.channel_port(ChannelPort::MediaAudio),
            latency_ms: self.latency_ms,
            video_device: self.config.video_device.clone(),
            audio_device: self.config.audio_device.clone(),
            hardware_acceleration: self.config.hardware_acceleration,
        };

        match self.build_leg(LegDescriptor::Outbound(descriptor), Self::start_outbound) {
            Ok(leg) => {
                self.outbound = Some(leg);
                self.video_enabled = true;
                self.audio_enabled = true;
                self.legs.advance(LegKind::Outbound, StreamState::Active)?;
                info!("[Pipeline] Outbound leg started");
                self.notify(Notice::LegStarted(LegKind::Outbound));
                Ok(())
            }
            Err(e) => Err(self.leg_failed(LegKind::Outbound, e)),
        }
    }

    /// Build and start the feedback video and feedback mix legs for the
    /// given topology. The topology is fixed by the first call of a
    /// session; each leg starts at most once.
    pub fn on_start_feedback(&mut self, topology: Topology) -> Result<(), SessionError> {
        self.require_media_allowed("start feedback legs", topology.loopback)?;

        let topology = match self.topology {
            Some(current) => {
                if current != topology {
                    warn!(
                        "[Session] Topology already negotiated as {:?}, ignoring {:?}",
                        current, topology
                    );
                }
                current
            }
            None => {
                self.topology = Some(topology);
                topology
            }
        };

        let mut first_error = None;

        if self.legs.feedback == StreamState::Stopped {
            if let Err(e) = self.start_feedback_leg(topology) {
                first_error.get_or_insert(e);
            }
        } else {
            debug!("[Session] Feedback leg already {:?}", self.legs.feedback);
        }

        if topology.loopback {
            debug!("[Session] No feedback mix in loopback mode");
        } else if self.legs.mix == StreamState::Stopped {
            if let Err(e) = self.start_mix_leg(topology) {
                first_error.get_or_insert(e);
            }
        } else {
            debug!("[Session] Feedback mix already {:?}", self.legs.mix);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn start_feedback_leg(&mut self, topology: Topology) -> Result<(), SessionError> {
        self.legs.advance(LegKind::Feedback, StreamState::Starting)?;

        let (source, video_port) = if topology.loopback {
            (Endpoint::Listen, self.channel_port(ChannelPort::MediaVideo))
        } else {
            (
                Endpoint::Remote(self.config.station.clone()),
                self.channel_port(ChannelPort::FeedbackMediaVideo),
            )
        };
        let descriptor = FeedbackDescriptor {
            source,
            video_port,
            latency_ms: self.latency_ms,
            hardware_acceleration: self.config.hardware_acceleration,
        };

        match self.build_leg(LegDescriptor::Feedback(descriptor), |_, built| Ok(built.handle)) {
            Ok(handle) => {
                self.feedback = Some(handle);
                self.legs.advance(LegKind::Feedback, StreamState::Active)?;
                info!("[Pipeline] Feedback leg started");
                self.notify(Notice::LegStarted(LegKind::Feedback));
                Ok(())
            }
            Err(e) => Err(self.leg_failed(LegKind::Feedback, e)),
        }
    }

    fn start_mix_leg(&mut self, topology: Topology) -> Result<(), SessionError> {
        self.legs.advance(LegKind::FastFeedbackMix, StreamState::Starting)?;

        let ports = self.config.ports;
        let sources: Vec<MixSource> = (0..topology.guest_count)
            .map(|i| MixSource {
                role: MixRole::Guest,
                index: i,
                port: ports.channel_port(i as u32, ChannelPort::AudioMirror),
            })
            .chain((0..topology.external_count).map(|i| MixSource {
                role: MixRole::External,
                index: i,
                port: ports.external_mirror_audio(i as u32),
            }))
            .collect();
        let descriptor = MixDescriptor {
            host: self.config.station.clone(),
            sources: sources.clone(),
            latency_ms: self.latency_ms,
        };

        let built = self.build_leg(LegDescriptor::FastFeedbackMix(descriptor), |this, built| {
            this.start_mix(built, &sources)
        });
        match built {
            Ok((bus, legs)) => {
                self.mix = Some(bus);
                self.registry.populate(legs);
                self.monitor_enabled = true;
                self.legs.advance(LegKind::FastFeedbackMix, StreamState::Active)?;
                info!(
                    "[Pipeline] Feedback mix started with {} guests and {} externals",
                    topology.guest_count, topology.external_count
                );
                self.notify(Notice::LegStarted(LegKind::FastFeedbackMix));
                Ok(())
            }
            Err(e) => Err(self.leg_failed(LegKind::FastFeedbackMix, e)),
        }
    }

    /// Build a leg, run `start` on it, and release it again if anything
    /// after the build fails.
    fn build_leg<T>(
        &mut self,
        descriptor: LegDescriptor,
        start: impl FnOnce(&mut Self, &BuiltLeg) -> Result<T, PipelineError>,
    ) -> Result<T, PipelineError> {
        let built = self.pipeline.build(&descriptor)?;
        let started = start(self, &built)
            .and_then(|value| {
                self.pipeline.set_state(built.handle, PlayState::Playing)?;
                Ok(value)
            });
        if started.is_err() {
            self.pipeline.teardown(built.handle);
        }
        started
    }

    fn start_outbound(&mut self, built: &BuiltLeg) -> Result<OutboundLeg, PipelineError> {
        let leg = OutboundLeg {
            handle: built.handle,
            mic_volume: built.control(ControlPoint::MicVolume)?,
            mic_mute: built.control(ControlPoint::MicMute)?,
            camera: built.control(ControlPoint::Camera)?,
            camera_blend: built.control(ControlPoint::CameraBlend)?,
            placeholder_blend: built.control(ControlPoint::PlaceholderBlend)?,
        };
        self.pipeline.set_property(&leg.camera_blend, Property::Alpha(1.0))?;
        self.pipeline.set_property(&leg.placeholder_blend, Property::Alpha(0.0))?;
        self.pipeline.set_property(&leg.mic_mute, gain_switch(true))?;
        self.pipeline.set_property(&leg.mic_volume, Property::Volume(self.mic_gain))?;
        Ok(leg)
    }

    fn start_mix(&mut self, built: &BuiltLeg, sources: &[MixSource]) -> Result<(MixBus, Vec<MixLeg>), PipelineError> {
        let bus = MixBus {
            handle: built.handle,
            monitor_mute: built.control(ControlPoint::MonitorMute)?,
            monitor_volume: built.control(ControlPoint::MonitorVolume)?,
        };
        let legs = sources
            .iter()
            .map(|s| {
                let control = built.control(ControlPoint::Mix(s.role, s.index))?;
                Ok(MixLeg::new(s.role, s.index, s.port, control))
            })
            .collect::<Result<Vec<_>, PipelineError>>()?;

        self.pipeline.set_property(&bus.monitor_mute, gain_switch(true))?;
        self.pipeline.set_property(&bus.monitor_volume, Property::Volume(self.monitor_gain))?;
        for leg in &legs {
            self.pipeline
                .set_property(&leg.control, Property::Volume(DEFAULT_MIX_VOLUME))?;
        }
        Ok((bus, legs))
    }

    fn leg_failed(&mut self, leg: LegKind, e: PipelineError) -> SessionError {
        error!("[Pipeline] {:?} leg failed: {}", leg, e);
        self.legs.stop(leg);
        self.notify(Notice::LegFailed {
            leg,
            error: e.clone(),
        });
        SessionError::Pipeline(e)
    }

    // ------------------------------------------------------------------
    // Controls on running legs
    // ------------------------------------------------------------------

    fn outbound_leg(&self, action: &'static str) -> Result<OutboundLeg, SessionError> {
        self.outbound.ok_or(SessionError::LegNotActive {
            action,
            leg: LegKind::Outbound,
        })
    }

    fn mix_bus(&self, action: &'static str) -> Result<MixBus, SessionError> {
        self.mix.ok_or(SessionError::LegNotActive {
            action,
            leg: LegKind::FastFeedbackMix,
        })
    }

    /// Switch between the camera and the placeholder. Returns whether the
    /// camera is now shown.
    pub fn toggle_video_input(&mut self) -> Result<bool, SessionError> {
        let leg = self.outbound_leg("toggle video")?;
        let enable = !self.video_enabled;

        self.pipeline.set_property(&leg.camera, Property::Active(enable))?;
        let (camera, placeholder) = if enable { (1.0, 0.0) } else { (0.0, 1.0) };
        self.pipeline.set_property(&leg.camera_blend, Property::Alpha(camera))?;
        self.pipeline
            .set_property(&leg.placeholder_blend, Property::Alpha(placeholder))?;

        self.video_enabled = enable;
        info!("[Session] Video {}", if enable { "on" } else { "off" });
        Ok(enable)
    }

    /// Mute or unmute the microphone. Returns whether it is now live.
    pub fn toggle_audio_input(&mut self) -> Result<bool, SessionError> {
        let leg = self.outbound_leg("toggle microphone")?;
        let enable = !self.audio_enabled;
        self.pipeline.set_property(&leg.mic_mute, gain_switch(enable))?;
        self.audio_enabled = enable;
        info!("[Session] Microphone {}", if enable { "on" } else { "off" });
        Ok(enable)
    }

    /// Mute or unmute the local monitor. Returns whether it is now audible.
    pub fn toggle_feedback_audio_output(&mut self) -> Result<bool, SessionError> {
        let bus = self.mix_bus("toggle monitor")?;
        let enable = !self.monitor_enabled;
        self.pipeline.set_property(&bus.monitor_mute, gain_switch(enable))?;
        self.monitor_enabled = enable;
        info!("[Session] Monitor {}", if enable { "on" } else { "off" });
        Ok(enable)
    }

    /// Remember the microphone gain and apply it if the outbound leg runs.
    pub fn set_mic_volume(&mut self, raw: i32) -> Result<f64, SessionError> {
        let gain = slider_gain(raw);
        self.mic_gain = gain;
        if let Some(leg) = self.outbound {
            self.pipeline.set_property(&leg.mic_volume, Property::Volume(gain))?;
        }
        Ok(gain)
    }

    /// Remember the monitor gain and apply it if the mix runs.
    pub fn set_monitor_volume(&mut self, raw: i32) -> Result<f64, SessionError> {
        let gain = slider_gain(raw);
        self.monitor_gain = gain;
        if let Some(bus) = self.mix {
            self.pipeline
                .set_property(&bus.monitor_volume, Property::Volume(gain))?;
        }
        Ok(gain)
    }

    /// Set one mix leg's gain.
    pub fn set_volume(&mut self, role: MixRole, index: usize, value: f64) -> Result<(), SessionError> {
        self.mix_bus("set mix volume")?;
        self.registry.set_volume(&mut self.pipeline, role, index, value)
    }

    /// Apply a station level update to the mix.
    pub fn set_mix_volumes(&mut self, guests: &[f64], externals: &[f64]) -> Result<usize, SessionError> {
        self.mix_bus("set mix volumes")?;
        let applied = self.registry.apply_levels(&mut self.pipeline, guests, externals)?;
        debug!("[Session] Updated {} mix levels", applied);
        Ok(applied)
    }

    /// Start a local loopback of outbound and feedback video without a
    /// station, or stop whatever runs.
    pub fn toggle_self_test(&mut self) -> Result<(), SessionError> {
        if self.connection == ConnectionState::Connected || self.legs.any_active() {
            self.disconnect();
            return Ok(());
        }
        if self.connection == ConnectionState::Connecting {
            return Err(SessionError::InvalidTransition {
                action: "start self-test",
                state: self.connection,
            });
        }

        info!("[Session] Starting self-test");
        let topology = Topology::loopback();
        self.topology = Some(topology);
        let common = self.on_start_common();
        let feedback = self.on_start_feedback(topology);
        if !self.legs.any_active() {
            warn!("[Session] Self-test could not start any leg");
            self.stop_streams();
        }
        common.and(feedback)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            connection: self.connection,
            epoch: self.epoch,
            legs: self.legs,
            topology: self.topology,
            latency_ms: self.latency_ms,
            video_enabled: self.video_enabled,
            audio_enabled: self.audio_enabled,
            monitor_enabled: self.monitor_enabled,
            mic_gain: self.mic_gain,
            monitor_gain: self.monitor_gain,
            mix_legs: self
                .registry
                .iter()
                .map(|leg| MixLegSnapshot {
                    role: leg.role,
                    index: leg.index,
                    volume: leg.volume,
                    port: leg.port,
                })
                .collect(),
        }
    }
}
