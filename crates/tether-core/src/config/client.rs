//! Client configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_secs;

/// Configuration for the Tether client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the session API used to resolve connect metadata
    pub api_base_url: String,

    /// Local directory sync-back writes into.
    ///
    /// Defaults to the current working directory at connect time when
    /// unset.
    pub workspace_dir: Option<PathBuf>,

    /// Whether to request remote-to-local file replication on connect
    pub sync_back: bool,

    /// Websocket handshake timeout
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Route diagnostic log lines to this file instead of the terminal
    pub debug_log: Option<PathBuf>,

    /// Reconnection behavior after a dropped connection
    pub reconnect: ReconnectConfig,

    /// Half-open connection detection
    pub health: HealthConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.tether.sh".to_string(),
            workspace_dir: None,
            sync_back: false,
            connect_timeout: Duration::from_secs(30),
            debug_log: None,
            reconnect: ReconnectConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

/// Reconnection settings.
///
/// A dropped connection is retried a fixed number of times with a fixed
/// delay; deliberate terminations (user interrupt, remote exit, takeover
/// by another client) are never retried.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Whether to reconnect automatically on disconnection
    pub auto: bool,

    /// Delay between attempts
    #[serde(with = "duration_secs")]
    pub delay: Duration,

    /// Maximum number of connection attempts before giving up
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            auto: true,
            delay: Duration::from_secs(3),
            max_attempts: 5,
        }
    }
}

/// Half-open connection detection settings.
///
/// Some network failures never surface as a close or error event on the
/// transport, so the relay also watches for inbound silence. The server
/// pings every `heartbeat_interval`; silence past that interval plus
/// `silence_buffer` means the connection is dead.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// How often the relay checks the last-inbound-data timestamp.
    /// Must be shorter than the silence threshold.
    #[serde(with = "duration_secs")]
    pub check_interval: Duration,

    /// Heartbeat interval the server is expected to honor
    #[serde(with = "duration_secs")]
    pub heartbeat_interval: Duration,

    /// Grace added on top of the heartbeat interval
    #[serde(with = "duration_secs")]
    pub silence_buffer: Duration,
}

impl HealthConfig {
    /// Inbound silence longer than this marks the connection dead
    pub fn silence_threshold(&self) -> Duration {
        self.heartbeat_interval + self.silence_buffer
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            silence_buffer: Duration::from_secs(15),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_threshold_exceeds_heartbeat() {
        let health = HealthConfig::default();
        assert!(health.silence_threshold() > health.heartbeat_interval);
        assert!(health.check_interval < health.silence_threshold());
    }

    #[test]
    fn test_defaults_are_sane() {
        let config = ClientConfig::default();
        assert!(config.reconnect.auto);
        assert!(config.reconnect.max_attempts > 0);
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
    }
}
