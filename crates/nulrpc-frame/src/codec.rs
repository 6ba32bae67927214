use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use crate::error::{FrameError, Result};

/// Frame terminator.
pub const SENTINEL: [u8; 2] = [0x00, 0x00];

/// Default cap on buffered bytes without a sentinel: 16 MiB.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum bytes buffered while waiting for a sentinel. Default: 16 MiB.
    pub max_frame_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// Encode a payload into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────────────┬──────────────┐
/// │ Payload (UTF-8 text) │ 0x00 0x00    │
/// └──────────────────────┴──────────────┘
/// ```
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if find_sentinel(payload, 0).is_some() {
        return Err(FrameError::EmbeddedSentinel);
    }
    dst.reserve(payload.len() + SENTINEL.len());
    dst.put_slice(payload);
    dst.put_slice(&SENTINEL);
    Ok(())
}

fn find_sentinel(buf: &[u8], from: usize) -> Option<usize> {
    if from >= buf.len() {
        return None;
    }
    buf[from..]
        .windows(SENTINEL.len())
        .position(|window| window == SENTINEL)
        .map(|pos| pos + from)
}

/// `tokio_util` codec splitting a byte stream on the sentinel.
///
/// Decoded items are the bytes between sentinels. Empty segments (e.g. two
/// sentinels in a row) are skipped.
#[derive(Debug, Clone, Default)]
pub struct FrameCodec {
    config: FrameConfig,
    // Bytes of the buffer already searched without finding a sentinel.
    scanned: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: FrameConfig) -> Self {
        Self { config, scanned: 0 }
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    /// Forget the scan position. Call after clearing the source buffer.
    pub fn reset(&mut self) {
        self.scanned = 0;
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        loop {
            // Back up one byte: the sentinel may straddle two reads.
            let start = self.scanned.saturating_sub(1);
            match find_sentinel(src, start) {
                Some(pos) => {
                    let frame = src.split_to(pos).freeze();
                    src.advance(SENTINEL.len());
                    self.scanned = 0;
                    if frame.is_empty() {
                        continue;
                    }
                    return Ok(Some(frame));
                }
                None => {
                    self.scanned = src.len();
                    if src.len() > self.config.max_frame_size {
                        let size = src.len();
                        src.clear();
                        self.scanned = 0;
                        return Err(FrameError::FrameTooLarge {
                            size,
                            max: self.config.max_frame_size,
                        });
                    }
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if !src.is_empty() {
            debug!(size = src.len(), "discarding unterminated trailing bytes");
            src.clear();
            self.scanned = 0;
        }
        Ok(None)
    }
}

impl<T: AsRef<[u8]>> Encoder<T> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<()> {
        encode_frame(item.as_ref(), dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(codec: &mut FrameCodec, buf: &mut BytesMut) -> Vec<Bytes> {
        let mut out = Vec::new();
        while let Some(frame) = codec.decode(buf).unwrap() {
            out.push(frame);
        }
        out
    }

    #[test]
    fn test_encode_appends_sentinel() {
        let mut buf = BytesMut::new();
        encode_frame(b"hello", &mut buf).unwrap();
        assert_eq!(buf.as_ref(), b"hello\0\0");
    }

    #[test]
    fn test_encode_rejects_embedded_sentinel() {
        let mut buf = BytesMut::new();
        let result = encode_frame(b"he\0\0llo", &mut buf);
        assert!(matches!(result, Err(FrameError::EmbeddedSentinel)));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_multiple_frames_in_one_chunk() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&b"first\0\0second\0\0"[..]);
        let frames = drain(&mut codec, &mut buf);
        assert_eq!(frames, vec![Bytes::from("first"), Bytes::from("second")]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_frame_is_retained() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&b"whole\0\0par"[..]);
        assert_eq!(drain(&mut codec, &mut buf), vec![Bytes::from("whole")]);
        assert_eq!(buf.as_ref(), b"par");

        buf.extend_from_slice(b"tial\0\0");
        assert_eq!(drain(&mut codec, &mut buf), vec![Bytes::from("partial")]);
    }

    #[test]
    fn test_sentinel_split_across_chunks() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&b"abc\0"[..]);
        assert!(drain(&mut codec, &mut buf).is_empty());

        buf.extend_from_slice(b"\0def\0\0");
        assert_eq!(
            drain(&mut codec, &mut buf),
            vec![Bytes::from("abc"), Bytes::from("def")]
        );
    }

    #[test]
    fn test_empty_segments_are_skipped() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&b"\0\0\0\0one\0\0\0\0"[..]);
        assert_eq!(drain(&mut codec, &mut buf), vec![Bytes::from("one")]);
    }

    #[test]
    fn test_oversized_buffer_is_discarded() {
        let mut codec = FrameCodec::with_config(FrameConfig { max_frame_size: 8 });
        let mut buf = BytesMut::from(&b"0123456789"[..]);
        let result = codec.decode(&mut buf);
        assert!(matches!(
            result,
            Err(FrameError::FrameTooLarge { size: 10, max: 8 })
        ));
        assert!(buf.is_empty());

        buf.extend_from_slice(b"ok\0\0");
        assert_eq!(drain(&mut codec, &mut buf), vec![Bytes::from("ok")]);
    }

    #[test]
    fn test_decode_eof_drops_unterminated_tail() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&b"done\0\0tail"[..]);
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), Some(Bytes::from("done")));
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_encoder_impl() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec.encode("hb", &mut buf).unwrap();
        codec.encode(Bytes::from_static(b"{}"), &mut buf).unwrap();
        assert_eq!(buf.as_ref(), b"hb\0\0{}\0\0");
    }
}
