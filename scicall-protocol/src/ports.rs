//! Deterministic port plan shared by the station and its guests.
//!
//! Every channel owns a block of `stride` consecutive ports starting at
//! `base + channel * stride`; each stream kind sits at a fixed offset inside
//! the block. External sources own their own blocks above `external_base`.
//! Both endpoints compute the same numbers, so nothing is negotiated.
//!
//! | purpose                        | port                         |
//! |--------------------------------|------------------------------|
//! | control                        | `base + c*stride + 0`        |
//! | video (legacy)                 | `base + c*stride + 1`        |
//! | audio (legacy)                 | `base + c*stride + 2`        |
//! | feedback video (legacy)        | `base + c*stride + 3`        |
//! | internal audio relay           | `base + c*stride + 5`        |
//! | outbound media video / audio   | `base + c*stride + 6` / `+7` |
//! | feedback media video / audio   | `base + c*stride + 8` / `+9` |
//! | guest audio mirror             | `base + c*stride + 10`       |
//! | external-source mirror audio   | `external_base + e*stride`   |

/// Transport port number. Kept wider than `u16` so the mapping is total.
pub type Port = u32;

/// First port of channel 0.
pub const PORT_BASE: Port = 20100;

/// First port of external source 0.
pub const EXTERNAL_PORT_BASE: Port = 20190;

/// Ports reserved per channel.
pub const PORTS_BY_CHANNEL: Port = 20;

/// Ports reserved per external source.
pub const PORTS_BY_EXTSOURCE: Port = 20;

/// Channels that fit below `EXTERNAL_PORT_BASE` without overlapping the
/// external-source blocks. Channel numbers at or above this are outside the
/// deployment range.
pub const MAX_CHANNELS: u32 = 4;

/// Channel-scoped stream kinds and their offsets within the channel block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelPort {
    Control,
    Video,
    Audio,
    FeedbackVideo,
    InternalAudioRelay,
    MediaVideo,
    MediaAudio,
    FeedbackMediaVideo,
    FeedbackMediaAudio,
    AudioMirror,
}

impl ChannelPort {
    /// Every channel-scoped kind.
    pub const ALL: [ChannelPort; 10] = [
        ChannelPort::Control,
        ChannelPort::Video,
        ChannelPort::Audio,
        ChannelPort::FeedbackVideo,
        ChannelPort::InternalAudioRelay,
        ChannelPort::MediaVideo,
        ChannelPort::MediaAudio,
        ChannelPort::FeedbackMediaVideo,
        ChannelPort::FeedbackMediaAudio,
        ChannelPort::AudioMirror,
    ];

    /// Offset of this kind inside a channel block.
    pub const fn offset(self) -> Port {
        match self {
            ChannelPort::Control => 0,
            ChannelPort::Video => 1,
            ChannelPort::Audio => 2,
            ChannelPort::FeedbackVideo => 3,
            ChannelPort::InternalAudioRelay => 5,
            ChannelPort::MediaVideo => 6,
            ChannelPort::MediaAudio => 7,
            ChannelPort::FeedbackMediaVideo => 8,
            ChannelPort::FeedbackMediaAudio => 9,
            ChannelPort::AudioMirror => 10,
        }
    }
}

/// Stateless mapping from (channel | external source, kind) to a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortAllocator {
    pub base: Port,
    pub external_base: Port,
    pub stride: Port,
    pub external_stride: Port,
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self {
            base: PORT_BASE,
            external_base: EXTERNAL_PORT_BASE,
            stride: PORTS_BY_CHANNEL,
            external_stride: PORTS_BY_EXTSOURCE,
        }
    }
}

impl PortAllocator {
    /// Default plan shifted to start at `base`. External sources keep their
    /// distance from the channel blocks.
    pub fn with_base(base: Port) -> Self {
        let default = Self::default();
        Self {
            base,
            external_base: base.wrapping_add(EXTERNAL_PORT_BASE - PORT_BASE),
            ..default
        }
    }

    /// Port of `kind` on the 0-based `channel`.
    ///
    /// `channel` must be below [`MAX_CHANNELS`]; larger values still map to a
    /// number but may collide with external-source ports. Arithmetic wraps
    /// instead of panicking on absurd inputs.
    pub fn channel_port(&self, channel: u32, kind: ChannelPort) -> Port {
        self.base
            .wrapping_add(channel.wrapping_mul(self.stride))
            .wrapping_add(kind.offset())
    }

    /// Control connection port for `channel`.
    pub fn control(&self, channel: u32) -> Port {
        self.channel_port(channel, ChannelPort::Control)
    }

    /// Mirror audio port of the 0-based external source `index`.
    pub fn external_mirror_audio(&self, index: u32) -> Port {
        self.external_base
            .wrapping_add(index.wrapping_mul(self.external_stride))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_port_table() {
        let ports = PortAllocator::default();
        assert_eq!(ports.control(0), 20100);
        assert_eq!(ports.channel_port(1, ChannelPort::Control), 20120);
        assert_eq!(ports.channel_port(2, ChannelPort::MediaVideo), 20146);
        assert_eq!(ports.channel_port(2, ChannelPort::MediaAudio), 20147);
        assert_eq!(ports.channel_port(0, ChannelPort::FeedbackMediaVideo), 20108);
        assert_eq!(ports.channel_port(0, ChannelPort::FeedbackMediaAudio), 20109);
        assert_eq!(ports.channel_port(1, ChannelPort::AudioMirror), 20130);
        assert_eq!(ports.external_mirror_audio(0), 20190);
        assert_eq!(ports.external_mirror_audio(2), 20230);
    }

    #[test]
    fn test_deterministic() {
        let a = PortAllocator::default();
        let b = PortAllocator::default();
        for channel in 0..MAX_CHANNELS {
            for kind in ChannelPort::ALL {
                assert_eq!(a.channel_port(channel, kind), b.channel_port(channel, kind));
            }
        }
    }

    #[test]
    fn test_no_collisions_within_deployment_range() {
        let ports = PortAllocator::default();
        let mut seen = HashSet::new();

        for channel in 0..MAX_CHANNELS {
            for kind in ChannelPort::ALL {
                assert!(
                    seen.insert(ports.channel_port(channel, kind)),
                    "collision at channel {} {:?}",
                    channel,
                    kind
                );
            }
        }
        for index in 0..32 {
            assert!(
                seen.insert(ports.external_mirror_audio(index)),
                "collision at external source {}",
                index
            );
        }
    }

    #[test]
    fn test_with_base_shifts_everything() {
        let ports = PortAllocator::with_base(40000);
        assert_eq!(ports.control(0), 40000);
        assert_eq!(ports.channel_port(1, ChannelPort::AudioMirror), 40030);
        assert_eq!(ports.external_mirror_audio(0), 40090);
    }

    #[test]
    fn test_huge_inputs_wrap() {
        let ports = PortAllocator::default();
        assert_eq!(ports.control(u32::MAX), PORT_BASE - PORTS_BY_CHANNEL);
        assert_eq!(
            ports.external_mirror_audio(u32::MAX),
            EXTERNAL_PORT_BASE - PORTS_BY_EXTSOURCE
        );

        let shifted = PortAllocator::with_base(u32::MAX);
        assert_eq!(shifted.external_mirror_audio(0), 89);
    }
}
