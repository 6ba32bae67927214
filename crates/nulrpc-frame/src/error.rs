/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Buffered bytes exceeded the configured limit without a sentinel.
    #[error("frame too large ({size} bytes without sentinel, max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// A frame contains the sentinel and cannot be encoded.
    #[error("payload contains the frame sentinel")]
    EmbeddedSentinel,

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FrameError>;
