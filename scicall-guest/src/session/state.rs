//! Session state values.

use log::warn;

use scicall_protocol::MAX_CHANNELS;

use crate::error::SessionError;
use crate::pipeline::LegKind;

/// Default transport latency in milliseconds.
pub const DEFAULT_LATENCY_MS: u32 = 60;

/// Upper bound on external sources in one mix.
pub const MAX_EXTERNAL_SOURCES: usize = 10;

/// Control connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and none wanted.
    Idle,
    /// A connect attempt is in flight.
    Connecting,
    /// Control channel up, keepalive running.
    Connected,
    /// The connection was lost (remote close, I/O failure, protocol abuse).
    Disconnected,
}

/// Lifecycle of one media leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamState {
    #[default]
    Stopped,
    Starting,
    Active,
}

/// State of the three legs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LegStates {
    pub outbound: StreamState,
    pub feedback: StreamState,
    pub mix: StreamState,
}

impl LegStates {
    pub fn get(&self, leg: LegKind) -> StreamState {
        match leg {
            LegKind::Outbound => self.outbound,
            LegKind::Feedback => self.feedback,
            LegKind::FastFeedbackMix => self.mix,
        }
    }

    fn slot(&mut self, leg: LegKind) -> &mut StreamState {
        match leg {
            LegKind::Outbound => &mut self.outbound,
            LegKind::Feedback => &mut self.feedback,
            LegKind::FastFeedbackMix => &mut self.mix,
        }
    }

    /// Move a leg forward: Stopped -> Starting -> Active.
    pub fn advance(&mut self, leg: LegKind, to: StreamState) -> Result<(), SessionError> {
        let slot = self.slot(leg);
        let from = *slot;
        match (from, to) {
            (StreamState::Stopped, StreamState::Starting)
            | (StreamState::Starting, StreamState::Active) => {
                *slot = to;
                Ok(())
            }
            _ => Err(SessionError::LegTransition { leg, from, to }),
        }
    }

    /// Stop a leg from wherever it is. Used by teardown and failed starts.
    pub fn stop(&mut self, leg: LegKind) {
        *self.slot(leg) = StreamState::Stopped;
    }

    pub fn any_active(&self) -> bool {
        [self.outbound, self.feedback, self.mix]
            .iter()
            .any(|s| *s != StreamState::Stopped)
    }
}

/// Negotiated mixing topology of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Topology {
    pub guest_count: usize,
    pub external_count: usize,
    pub loopback: bool,
}

impl Topology {
    /// Topology announced by the station.
    ///
    /// Counts beyond what the port plan can address are clamped: one mirror
    /// per channel for guests, [`MAX_EXTERNAL_SOURCES`] for externals.
    pub fn negotiated(count_of_guests: u32, count_of_externals: u32) -> Self {
        let max_guests = MAX_CHANNELS as usize;
        let guest_count = count_of_guests as usize;
        let external_count = count_of_externals as usize;

        if guest_count > max_guests {
            warn!("[Session] Station announced {} guests, using {}", guest_count, max_guests);
        }
        if external_count > MAX_EXTERNAL_SOURCES {
            warn!(
                "[Session] Station announced {} external sources, using {}",
                external_count, MAX_EXTERNAL_SOURCES
            );
        }

        Self {
            guest_count: guest_count.min(max_guests),
            external_count: external_count.min(MAX_EXTERNAL_SOURCES),
            loopback: false,
        }
    }

    /// Self-test topology: no mix sources, media looped through localhost.
    pub fn loopback() -> Self {
        Self {
            guest_count: 0,
            external_count: 0,
            loopback: true,
        }
    }

    pub fn source_count(&self) -> usize {
        self.guest_count + self.external_count
    }
}
