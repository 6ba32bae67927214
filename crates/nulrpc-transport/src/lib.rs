//! Resilient TCP connection management.
//!
//! This is the lowest layer of nulrpc. It owns the socket, connects with a
//! timeout, and (optionally) reconnects after an unsolicited close with a
//! fixed delay between a bounded number of attempts.
//!
//! The manager knows nothing about message content: inbound bytes and
//! lifecycle notifications are delivered to a [`ConnectionHandler`].

pub mod connection;
pub mod error;
pub mod state;
pub mod traits;

pub use connection::{ConnectConfig, ConnectionManager, Endpoint, DEFAULT_CONNECT_TIMEOUT};
pub use error::{Result, TransportError};
pub use state::{
    ConnectionState, ReconnectConfig, ReconnectState, DEFAULT_RECONNECT_DELAY,
    DEFAULT_RECONNECT_MAX_RETRIES,
};
pub use traits::{ConnectionEvent, ConnectionHandler};
