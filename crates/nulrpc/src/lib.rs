//! Resilient client for sentinel-framed TCP request/response and event
//! protocols.
//!
//! nulrpc keeps one TCP connection alive (reconnecting when asked to),
//! splits the byte stream into `\0\0`-terminated frames, answers heartbeat
//! probes, matches responses to requests by id and fans pushed events out
//! to subscribers.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP connection management and reconnection
//! - [`frame`]: sentinel framing and wire message types
//! - [`client`]: request correlation, events and heartbeats (behind `client` feature)

/// Re-export transport types.
pub mod transport {
    pub use nulrpc_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use nulrpc_frame::*;
}

/// Re-export client types (requires `client` feature).
#[cfg(feature = "client")]
pub mod client {
    pub use nulrpc_client::*;
}

#[cfg(feature = "client")]
pub use nulrpc_client::{Client, ClientError, ClientOptions};
