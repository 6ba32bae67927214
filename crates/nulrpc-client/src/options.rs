use std::time::Duration;

use nulrpc_transport::{ConnectConfig, ReconnectConfig};
use serde::{Deserialize, Serialize};

/// Client configuration.
///
/// Keys are camelCase and durations are whole milliseconds, so a config
/// file reads:
///
/// ```json
/// { "reconnect": true, "reconnectMaxRetries": -1, "requestTimeout": 500 }
/// ```
///
/// Missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientOptions {
    /// Reconnect automatically after an unsolicited close.
    pub reconnect: bool,
    /// Reconnect attempts per outage. Any negative value means unbounded.
    pub reconnect_max_retries: i64,
    /// Delay before each reconnect attempt.
    #[serde(with = "millis")]
    pub reconnect_timeout: Duration,
    /// Time allowed for each connect attempt.
    #[serde(with = "millis")]
    pub connect_timeout: Duration,
    /// Default per-request timeout.
    #[serde(with = "millis")]
    pub request_timeout: Duration,
    /// Actively verify heartbeats to detect half-open connections.
    pub heartbeat_check: bool,
    #[serde(with = "millis")]
    pub heartbeat_check_interval: Duration,
    /// Suppress per-heartbeat log lines.
    pub no_heartbeat_logs: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            reconnect: false,
            reconnect_max_retries: 3,
            reconnect_timeout: Duration::from_millis(8000),
            connect_timeout: Duration::from_millis(8000),
            request_timeout: Duration::from_millis(2000),
            heartbeat_check: false,
            heartbeat_check_interval: Duration::from_millis(8000),
            no_heartbeat_logs: false,
        }
    }
}

impl ClientOptions {
    /// Parse options from JSON text.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Retry bound for the transport; `None` is unbounded.
    pub fn max_retries(&self) -> Option<u32> {
        if self.reconnect_max_retries < 0 {
            None
        } else {
            Some(u32::try_from(self.reconnect_max_retries).unwrap_or(u32::MAX))
        }
    }

    pub fn connect_config(&self) -> ConnectConfig {
        ConnectConfig {
            connect_timeout: self.connect_timeout,
            reconnect: ReconnectConfig {
                enabled: self.reconnect,
                max_retries: self.max_retries(),
                delay: self.reconnect_timeout,
            },
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
