//! Feedback mix registry and local volume curve.

use log::{debug, warn};

use scicall_protocol::Port;

use crate::error::SessionError;
use crate::pipeline::{ControlRef, Pipeline, Property};

/// Lowest mix gain.
pub const MIN_VOLUME: f64 = 0.0;
/// Highest mix gain.
pub const MAX_VOLUME: f64 = 2.0;
/// Gain of a freshly built mix leg.
pub const DEFAULT_MIX_VOLUME: f64 = 1.0;

/// Which group of the station a mix source belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MixRole {
    Guest,
    External,
}

/// One inbound source of the feedback mix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MixLeg {
    pub role: MixRole,
    pub index: usize,
    pub volume: f64,
    pub port: Port,
    pub control: ControlRef,
}

impl MixLeg {
    pub fn new(role: MixRole, index: usize, port: Port, control: ControlRef) -> Self {
        Self {
            role,
            index,
            volume: DEFAULT_MIX_VOLUME,
            port,
            control,
        }
    }
}

/// Mix legs of the running feedback mix, indexed by role and position.
///
/// Populated exactly once per session from the negotiated topology and
/// emptied on teardown.
#[derive(Debug, Default)]
pub struct MixLegRegistry {
    guests: Vec<MixLeg>,
    externals: Vec<MixLeg>,
}

impl MixLegRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the registry content. Legs keep the order they are given in
    /// within their role.
    pub fn populate(&mut self, legs: impl IntoIterator<Item = MixLeg>) {
        self.clear();
        for leg in legs {
            match leg.role {
                MixRole::Guest => self.guests.push(leg),
                MixRole::External => self.externals.push(leg),
            }
        }
    }

    pub fn clear(&mut self) {
        self.guests.clear();
        self.externals.clear();
    }

    pub fn len(&self) -> usize {
        self.guests.len() + self.externals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn count(&self, role: MixRole) -> usize {
        self.role(role).len()
    }

    pub fn get(&self, role: MixRole, index: usize) -> Option<&MixLeg> {
        self.role(role).get(index)
    }

    /// All legs, guests first.
    pub fn iter(&self) -> impl Iterator<Item = &MixLeg> {
        self.guests.iter().chain(self.externals.iter())
    }

    fn role(&self, role: MixRole) -> &[MixLeg] {
        match role {
            MixRole::Guest => &self.guests,
            MixRole::External => &self.externals,
        }
    }

    fn role_mut(&mut self, role: MixRole) -> &mut Vec<MixLeg> {
        match role {
            MixRole::Guest => &mut self.guests,
            MixRole::External => &mut self.externals,
        }
    }

    /// Set the gain of one mix leg. Touches nothing else.
    pub fn set_volume<P: Pipeline>(
        &mut self,
        pipeline: &mut P,
        role: MixRole,
        index: usize,
        value: f64,
    ) -> Result<(), SessionError> {
        let legs = self.role_mut(role);
        let count = legs.len();
        let leg = legs
            .get_mut(index)
            .ok_or(SessionError::MixIndexOutOfRange { role, index, count })?;

        let volume = value.clamp(MIN_VOLUME, MAX_VOLUME);
        if volume != value {
            debug!("[Session] {:?} mix {} volume {} clamped to {}", role, index, value, volume);
        }
        pipeline.set_property(&leg.control, Property::Volume(volume))?;
        leg.volume = volume;
        Ok(())
    }

    /// Apply a station level update. Entry `i` of each list addresses leg
    /// `i` of that role; legs past the end of a list keep their level.
    /// Returns how many legs were updated.
    ///
    /// A leg the pipeline refuses keeps its old level while the rest are
    /// still applied; the first such error is returned afterwards.
    pub fn apply_levels<P: Pipeline>(
        &mut self,
        pipeline: &mut P,
        guest_levels: &[f64],
        external_levels: &[f64],
    ) -> Result<usize, SessionError> {
        let mut applied = 0;
        let mut first_error = None;
        for (role, levels) in [(MixRole::Guest, guest_levels), (MixRole::External, external_levels)] {
            let count = self.count(role);
            if levels.len() > count {
                warn!(
                    "[Session] {} {:?} levels for {} mix legs, extra entries ignored",
                    levels.len(),
                    role,
                    count
                );
            }
            for (index, level) in levels.iter().take(count).enumerate() {
                match self.set_volume(pipeline, role, index, *level) {
                    Ok(()) => applied += 1,
                    Err(e) => {
                        warn!("[Session] {:?} mix leg {} keeps its level: {}", role, index, e);
                        first_error.get_or_insert(e);
                    }
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(applied),
        }
    }
}

/// Map a local slider position (`0..=2000`) to a linear gain.
///
/// Positions below 50 snap to silence and above 1950 to full gain, so both
/// ends are easy to hit. Everything else is linear with 1000 at unity.
pub fn slider_gain(raw: i32) -> f64 {
    let snapped = match raw {
        r if r < 50 => 0,
        r if r > 1950 => 2000,
        r => r,
    };
    f64::from(snapped) / 1000.0
}
