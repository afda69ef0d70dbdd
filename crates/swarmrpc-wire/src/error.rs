/// Errors that can occur during envelope encoding/decoding or framing.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// A frame's envelope bytes are truncated or tag-inconsistent.
    #[error("malformed envelope: {0}")]
    Malformed(&'static str),

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, WireError>;
