use std::time::Duration;

use nulrpc_frame::FrameError;
use nulrpc_transport::TransportError;

/// Errors surfaced to callers of the client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The connect attempt failed or timed out.
    #[error("connect failed: {0}")]
    Connect(#[source] TransportError),

    /// A request was sent while not connected.
    #[error("not connected")]
    Disconnected,

    /// The request has no id to correlate its response with.
    #[error("request id is required")]
    MissingId,

    /// No matching response arrived in time.
    #[error("request {id} timed out after {elapsed:?}")]
    RequestTimeout { id: String, elapsed: Duration },

    /// Writing the request to the socket failed.
    #[error("write failed: {0}")]
    Write(#[source] TransportError),

    /// The request could not be encoded.
    #[error("encode failed: {0}")]
    Encode(#[from] FrameError),
}

pub type Result<T> = std::result::Result<T, ClientError>;
