use std::time::Duration;

/// Errors that can occur in TCP transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connect attempt failed at the transport level.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    /// The connect attempt did not complete within the connect timeout.
    #[error("connect to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    /// A connection is already established.
    #[error("already connected")]
    AlreadyConnected,

    /// An initial connect attempt is still in flight.
    #[error("connect already in progress")]
    ConnectInProgress,

    /// No connection is established.
    #[error("not connected")]
    NotConnected,

    /// A reconnect loop is already running.
    #[error("reconnect already in progress")]
    ReconnectInProgress,

    /// Reconnection requires a previous successful connect.
    #[error("no previous successful connection to re-establish")]
    NeverConnected,

    /// Every permitted reconnect attempt failed.
    #[error("max reconnect retries reached ({attempts} attempts)")]
    ReconnectExhausted { attempts: u32 },

    /// An I/O error occurred on the stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// True when the failure was a connect timeout rather than a transport error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::ConnectTimeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
