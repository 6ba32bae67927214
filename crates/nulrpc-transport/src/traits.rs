use crate::connection::ConnectionManager;

/// Lifecycle notifications emitted by the [`ConnectionManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A socket was installed. Emitted before any byte of it is delivered.
    Connected { addr: String },
    /// The peer closed the socket or a read failed.
    Closed { addr: String },
    /// A reconnect attempt is about to sleep and then connect.
    Reconnecting { attempt: u32, max: Option<u32> },
    /// The reconnect loop re-established the connection.
    Reconnected { addr: String },
    /// One reconnect attempt failed; the loop continues if attempts remain.
    ReconnectAttemptFailed {
        attempt: u32,
        max: Option<u32>,
        reason: String,
    },
    /// Every permitted attempt failed. The connection is now `Failed`.
    ReconnectExhausted { attempts: u32 },
}

/// Receiver of inbound bytes and lifecycle events.
///
/// Both methods are invoked from the connection's read task, one call at a
/// time per socket. Chunks of one socket arrive in order; implementations
/// must not block.
pub trait ConnectionHandler: Send + Sync + 'static {
    /// A chunk of bytes read from the socket.
    fn on_data(&self, connection: &ConnectionManager, chunk: &[u8]);

    /// A lifecycle notification.
    fn on_event(&self, _connection: &ConnectionManager, _event: &ConnectionEvent) {}
}
