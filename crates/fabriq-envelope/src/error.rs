/// Errors that can occur during envelope encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// The frame header contains an invalid magic number.
    #[error("invalid frame magic (expected 0x4651 \"FQ\")")]
    InvalidMagic,

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The envelope exceeds the maximum frame count.
    #[error("too many frames in envelope (max {max})")]
    TooManyFrames { max: usize },

    /// An envelope must carry at least one frame.
    #[error("empty envelope")]
    EmptyEnvelope,

    /// An I/O error occurred while reading or writing frames.
    #[error("envelope I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete envelope was received.
    #[error("connection closed (incomplete envelope)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, EnvelopeError>;
