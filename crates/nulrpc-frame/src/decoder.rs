use bytes::{Bytes, BytesMut};
use tokio_util::codec::Decoder;
use tracing::warn;

use crate::codec::{FrameCodec, FrameConfig};
use crate::error::Result;
use crate::message::DecodedMessage;

/// Prefix identifying a heartbeat frame.
pub const HEARTBEAT_MARKER: &[u8; 2] = b"hb";

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Heartbeat probe; the full frame, marker included.
    Heartbeat(Bytes),
    /// Structured message.
    Message(DecodedMessage),
}

/// Classify one complete frame (sentinel already stripped).
pub fn classify(frame: Bytes) -> Result<Inbound> {
    if frame.starts_with(HEARTBEAT_MARKER) {
        return Ok(Inbound::Heartbeat(frame));
    }
    DecodedMessage::from_slice(&frame).map(Inbound::Message)
}

/// Reassembles TCP chunks into classified frames.
///
/// Malformed frames are logged and dropped; they never affect the framing
/// of the frames that follow.
#[derive(Debug)]
pub struct FrameDecoder {
    codec: FrameCodec,
    buf: BytesMut,
    dropped: u64,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_config(FrameConfig::default())
    }

    pub fn with_config(config: FrameConfig) -> Self {
        Self {
            codec: FrameCodec::with_config(config),
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            dropped: 0,
        }
    }

    /// Append a chunk and return every frame it completes, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Inbound> {
        self.buf.extend_from_slice(chunk);

        let mut out = Vec::new();
        loop {
            match self.codec.decode(&mut self.buf) {
                Ok(Some(frame)) => {
                    let size = frame.len();
                    match classify(frame) {
                        Ok(inbound) => out.push(inbound),
                        Err(err) => {
                            self.dropped += 1;
                            warn!(error = %err, size, "dropping malformed frame");
                        }
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    self.dropped += 1;
                    warn!(error = %err, "discarding unterminated frame");
                }
            }
        }
        out
    }

    /// Drop any partial frame, e.g. when a new connection starts.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.codec.reset();
    }

    /// Frames dropped as malformed or oversized so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Bytes waiting for a sentinel.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}
