//! Sentinel-delimited message framing for nulrpc.
//!
//! Every message on the wire is UTF-8 text terminated by a two-byte
//! sentinel (`\0\0`):
//! - heartbeat frames start with the marker `hb` and are echoed verbatim
//! - every other frame is a JSON message (see [`DecodedMessage`])
//!
//! TCP chunk boundaries do not match frame boundaries. [`FrameDecoder`]
//! accumulates chunks and only ever hands out complete frames.

pub mod codec;
pub mod decoder;
pub mod error;
pub mod message;

pub use codec::{encode_frame, FrameCodec, FrameConfig, DEFAULT_MAX_FRAME_SIZE, SENTINEL};
pub use decoder::{classify, FrameDecoder, Inbound, HEARTBEAT_MARKER};
pub use error::{FrameError, Result};
pub use message::{generate_id, DecodedMessage, MessageKind, Request, Status};
