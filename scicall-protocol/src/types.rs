//! Command vocabulary exchanged over the control channel.

use serde::{Deserialize, Serialize};

/// Maximum length of a single control line, excluding the terminator (64 KiB).
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Line terminator for every control message.
pub const LINE_TERMINATOR: u8 = b'\n';

/// Every `cmd` tag understood by this protocol revision.
pub const KNOWN_TAGS: [&str; 9] = [
    "hello_from_server",
    "hello_from_guest",
    "start_common_stream",
    "start_feedback_stream",
    "set_srtlatency",
    "client_collision",
    "remote_restart",
    "set_volumes",
    "keepalive",
];

/// A control command.
///
/// On the wire every command is a JSON object whose `cmd` field carries the
/// snake_case tag, with the payload fields next to it:
///
/// ```text
/// {"cmd": "start_feedback_stream", "count_of_guests": 3, "count_of_externals": 2}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    /// Station greeting, sent right after the guest connects.
    HelloFromServer,
    /// Guest reply to the station greeting.
    HelloFromGuest,
    /// Start the outbound capture leg.
    StartCommonStream,
    /// Start the feedback legs with the negotiated mixing topology.
    StartFeedbackStream {
        count_of_guests: u32,
        count_of_externals: u32,
    },
    /// Set the transport latency (milliseconds) for legs built afterwards.
    #[serde(rename = "set_srtlatency")]
    SetSrtLatency { data: u32 },
    /// The channel is already occupied by another guest.
    ClientCollision,
    /// The station asks the guest to reconnect.
    RemoteRestart,
    /// Per-source gains for the feedback mix, applied positionally.
    SetVolumes {
        guest_channels: Vec<f64>,
        external_channels: Vec<f64>,
    },
    /// Liveness signal. Guests send their 1-based channel number in `ch`.
    Keepalive {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ch: Option<u32>,
    },
}

impl Command {
    /// The wire tag of this command.
    pub fn tag(&self) -> &'static str {
        match self {
            Command::HelloFromServer => "hello_from_server",
            Command::HelloFromGuest => "hello_from_guest",
            Command::StartCommonStream => "start_common_stream",
            Command::StartFeedbackStream { .. } => "start_feedback_stream",
            Command::SetSrtLatency { .. } => "set_srtlatency",
            Command::ClientCollision => "client_collision",
            Command::RemoteRestart => "remote_restart",
            Command::SetVolumes { .. } => "set_volumes",
            Command::Keepalive { .. } => "keepalive",
        }
    }

    /// Keepalive as sent by a guest on the given 0-based channel.
    pub fn keepalive_for(channel: u32) -> Self {
        Command::Keepalive {
            ch: Some(channel + 1),
        }
    }
}

/// Returns true if `tag` names a command of this protocol revision.
pub fn is_known_tag(tag: &str) -> bool {
    KNOWN_TAGS.contains(&tag)
}
