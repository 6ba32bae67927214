use std::fmt;
use std::time::Duration;

/// Default number of reconnect attempts after an unsolicited close.
pub const DEFAULT_RECONNECT_MAX_RETRIES: u32 = 3;

/// Default fixed delay before each reconnect attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(8000);

/// Lifecycle state of the managed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket; never connected or closed by the caller.
    Disconnected,
    /// Initial connect attempt in flight.
    Connecting,
    /// Socket is open and usable for writes.
    Connected,
    /// Reconnect loop is running.
    Reconnecting,
    /// Connect failed or reconnect attempts were exhausted.
    Failed,
}

impl ConnectionState {
    /// Lowercase name used in logs and CLI output.
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reconnection policy: fixed delay, bounded or unbounded attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Arm the close observer after a successful connect.
    pub enabled: bool,
    /// Maximum attempts per reconnect loop. `None` retries forever.
    pub max_retries: Option<u32>,
    /// Sleep before every attempt.
    pub delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_retries: Some(DEFAULT_RECONNECT_MAX_RETRIES),
            delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

/// Snapshot of the reconnect bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectState {
    pub attempt_count: u32,
    pub max_attempts: Option<u32>,
    pub delay: Duration,
    pub in_progress: bool,
}

impl ReconnectState {
    pub(crate) fn new(config: &ReconnectConfig) -> Self {
        Self {
            attempt_count: 0,
            max_attempts: config.max_retries,
            delay: config.delay,
            in_progress: false,
        }
    }

    /// True while another attempt is permitted.
    pub fn has_attempts_left(&self) -> bool {
        match self.max_attempts {
            Some(max) => self.attempt_count < max,
            None => true,
        }
    }
}
