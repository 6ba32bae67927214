//! High-level nulrpc client.
//!
//! This is the "just works" layer. Start a [`Client`], send requests that
//! resolve with the matching response, and subscribe to server-pushed
//! events. Reconnection and heartbeats run in the background.
//!
//! ```no_run
//! use nulrpc_client::{Client, ClientOptions, Request};
//!
//! # async fn run() -> nulrpc_client::Result<()> {
//! let client = Client::new();
//! client.start("127.0.0.1", 5201, ClientOptions::default()).await?;
//!
//! let reply = client.send_request(&Request::new("ping"), None).await?;
//! println!("{:?}", reply.value);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod correlator;
mod dispatch;
pub mod error;
pub mod events;
pub mod heartbeat;
pub mod options;

pub use client::{Client, ConnectionCallback};
pub use correlator::Correlator;
pub use error::{ClientError, Result};
pub use events::{callback, EventCallback, EventRegistry, EventStream};
pub use heartbeat::{HeartbeatMonitor, HeartbeatState};
pub use options::ClientOptions;

pub use nulrpc_frame::{DecodedMessage, MessageKind, Request, Status};
pub use nulrpc_transport::{ConnectionEvent, ConnectionState, ReconnectState};
