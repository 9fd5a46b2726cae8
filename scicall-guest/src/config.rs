//! Configuration loading for the guest.
//!
//! Settings are read from a TOML file in the following order:
//! 1. The path given with `--config`
//! 2. `scicall-guest.toml` in the current directory
//! 3. Environment variables (`SCICALL_*`)
//!
//! Anything left unset falls back to the built-in defaults when the
//! runtime [`SessionConfig`] is derived.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info, warn};
use serde::Deserialize;

use scicall_protocol::{PortAllocator, MAX_CHANNELS};

use crate::error::ConfigError;
use crate::session::{SessionConfig, DEFAULT_LATENCY_MS};

/// File looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "scicall-guest.toml";

/// Configuration file format.
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct GuestConfig {
    #[serde(default)]
    pub station: StationSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub media: MediaSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct StationSection {
    pub host: Option<String>,
    /// 1-based channel number.
    pub channel: Option<u32>,
    pub port_base: Option<u32>,
}

/// Timing of the session, all in milliseconds.
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct SessionSection {
    pub connect_timeout_ms: Option<u64>,
    pub keepalive_interval_ms: Option<u64>,
    pub settle_delay_ms: Option<u64>,
    pub reconnect_delay_ms: Option<u64>,
    pub max_consecutive_malformed: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct MediaSection {
    pub latency_ms: Option<u32>,
    pub video_device: Option<String>,
    pub audio_device: Option<String>,
    pub hardware_acceleration: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct LoggingSection {
    pub log_dir: Option<String>,
    pub retention_days: Option<u64>,
    pub level: Option<String>,
}

impl GuestConfig {
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Derive the runtime session settings, filling in defaults.
    pub fn session_config(&self) -> Result<SessionConfig, ConfigError> {
        let defaults = SessionConfig::default();

        let channel = self.station.channel.unwrap_or(1);
        if channel == 0 || channel > MAX_CHANNELS {
            return Err(ConfigError::InvalidChannel {
                channel,
                max: MAX_CHANNELS,
            });
        }

        let ports = match self.station.port_base {
            None => PortAllocator::default(),
            Some(base) if base > 0 && base < u32::from(u16::MAX) => PortAllocator::with_base(base),
            Some(base) => {
                return Err(ConfigError::InvalidValue {
                    key: "station.port_base",
                    value: base.to_string(),
                })
            }
        };

        let max_consecutive_malformed = self
            .session
            .max_consecutive_malformed
            .unwrap_or(defaults.max_consecutive_malformed);
        if max_consecutive_malformed == 0 {
            return Err(ConfigError::InvalidValue {
                key: "session.max_consecutive_malformed",
                value: "0".to_string(),
            });
        }

        let keepalive_interval = millis(self.session.keepalive_interval_ms, defaults.keepalive_interval);
        if keepalive_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "session.keepalive_interval_ms",
                value: "0".to_string(),
            });
        }

        Ok(SessionConfig {
            station: self.station.host.clone().unwrap_or(defaults.station),
            channel: channel - 1,
            ports,
            connect_timeout: millis(self.session.connect_timeout_ms, defaults.connect_timeout),
            keepalive_interval,
            settle_delay: millis(self.session.settle_delay_ms, defaults.settle_delay),
            reconnect_delay: millis(self.session.reconnect_delay_ms, defaults.reconnect_delay),
            latency_ms: self.media.latency_ms.unwrap_or(DEFAULT_LATENCY_MS),
            max_consecutive_malformed,
            video_device: self.media.video_device.clone(),
            audio_device: self.media.audio_device.clone(),
            hardware_acceleration: self.media.hardware_acceleration.unwrap_or(false),
        })
    }
}

fn millis(value: Option<u64>, default: Duration) -> Duration {
    value.map(Duration::from_millis).unwrap_or(default)
}

/// Load configuration: explicit path, then the default file, then the
/// environment.
pub fn load_config(path: Option<&Path>) -> Result<GuestConfig, ConfigError> {
    if let Some(path) = path {
        return load_from_file(path);
    }

    let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
    if default_path.exists() {
        return load_from_file(&default_path);
    }

    Ok(load_from_env())
}

/// Load configuration from a TOML file.
pub fn load_from_file(path: &Path) -> Result<GuestConfig, ConfigError> {
    info!("Loading configuration from {:?}", path);
    let contents = fs::read_to_string(path)?;
    GuestConfig::parse(&contents)
}

/// Load configuration from environment variables.
pub fn load_from_env() -> GuestConfig {
    from_lookup(|key| std::env::var(key).ok())
}

fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> GuestConfig {
    fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
        let raw = lookup(key)?;
        match raw.trim().parse() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("Ignoring {}={:?}: not a valid value", key, raw);
                None
            }
        }
    }

    let hardware_acceleration = lookup("SCICALL_HW_ACCEL").map(|s| {
        let lower = s.to_lowercase();
        lower == "1" || lower == "true" || lower == "yes" || lower == "on"
    });

    let config = GuestConfig {
        station: StationSection {
            host: lookup("SCICALL_STATION"),
            channel: parsed(&lookup, "SCICALL_CHANNEL"),
            port_base: parsed(&lookup, "SCICALL_PORT_BASE"),
        },
        session: SessionSection {
            connect_timeout_ms: parsed(&lookup, "SCICALL_CONNECT_TIMEOUT_MS"),
            keepalive_interval_ms: parsed(&lookup, "SCICALL_KEEPALIVE_INTERVAL_MS"),
            settle_delay_ms: parsed(&lookup, "SCICALL_SETTLE_DELAY_MS"),
            reconnect_delay_ms: parsed(&lookup, "SCICALL_RECONNECT_DELAY_MS"),
            max_consecutive_malformed: parsed(&lookup, "SCICALL_MAX_MALFORMED"),
        },
        media: MediaSection {
            latency_ms: parsed(&lookup, "SCICALL_LATENCY_MS"),
            video_device: lookup("SCICALL_VIDEO_DEVICE"),
            audio_device: lookup("SCICALL_AUDIO_DEVICE"),
            hardware_acceleration,
        },
        logging: LoggingSection {
            log_dir: lookup("SCICALL_LOG_DIR"),
            retention_days: parsed(&lookup, "SCICALL_LOG_RETENTION_DAYS"),
            level: lookup("SCICALL_LOG_LEVEL"),
        },
    };

    debug!(
        "Using environment/default config: station={:?}, channel={:?}",
        config.station.host, config.station.channel
    );
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use scicall_protocol::PORT_BASE;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let session = GuestConfig::default().session_config().unwrap();
        assert_eq!(session.station, "localhost");
        assert_eq!(session.channel, 0);
        assert_eq!(session.ports.control(0), PORT_BASE);
        assert_eq!(session.connect_timeout, Duration::from_millis(400));
        assert_eq!(session.keepalive_interval, Duration::from_millis(1500));
        assert_eq!(session.latency_ms, 60);
        assert_eq!(session.max_consecutive_malformed, 8);
    }

    #[test]
    fn test_parse_toml() {
        let config = GuestConfig::parse(
            r#"
[station]
host = "studio.example.org"
channel = 3

[session]
settle_delay_ms = 50

[media]
latency_ms = 120
hardware_acceleration = true

[logging]
level = "debug"
"#,
        )
        .unwrap();

        assert_eq!(config.logging.level.as_deref(), Some("debug"));
        let session = config.session_config().unwrap();
        assert_eq!(session.station, "studio.example.org");
        assert_eq!(session.channel, 2);
        assert_eq!(session.ports.control(session.channel), 20140);
        assert_eq!(session.settle_delay, Duration::from_millis(50));
        assert_eq!(session.latency_ms, 120);
        assert!(session.hardware_acceleration);
    }

    #[test]
    fn test_invalid_channel() {
        for channel in [0, MAX_CHANNELS + 1] {
            let mut config = GuestConfig::default();
            config.station.channel = Some(channel);
            assert!(matches!(
                config.session_config(),
                Err(ConfigError::InvalidChannel { .. })
            ));
        }
    }

    #[test]
    fn test_invalid_values() {
        let mut config = GuestConfig::default();
        config.station.port_base = Some(70000);
        assert!(matches!(config.session_config(), Err(ConfigError::InvalidValue { .. })));

        let mut config = GuestConfig::default();
        config.session.max_consecutive_malformed = Some(0);
        assert!(matches!(config.session_config(), Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            GuestConfig::parse("[station]\nchannel = \"two\"\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("SCICALL_STATION", "10.0.0.5"),
            ("SCICALL_CHANNEL", "2"),
            ("SCICALL_LATENCY_MS", "not-a-number"),
            ("SCICALL_HW_ACCEL", "Yes"),
        ]
        .into_iter()
        .collect();

        let config = from_lookup(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.station.host.as_deref(), Some("10.0.0.5"));
        assert_eq!(config.station.channel, Some(2));
        assert_eq!(config.media.latency_ms, None);
        assert_eq!(config.media.hardware_acceleration, Some(true));
    }

    #[test]
    fn test_missing_file() {
        let err = load_config(Some(Path::new("/nonexistent/scicall-guest.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
