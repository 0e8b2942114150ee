/// Errors that can occur while encoding, decoding, reading or writing messages.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// A frame declared more bytes than arrived before the stream ended.
    #[error("invalid package: frame declares {expected} bytes, only {available} arrived")]
    InvalidPackage { expected: usize, available: usize },

    /// The stream ended in the middle of a value.
    #[error("invalid package: stream ended inside a value ({available} bytes buffered)")]
    TruncatedValue { available: usize },

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing.
    #[error("codec I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the connection at a message boundary.
    #[error("connection closed")]
    ConnectionClosed,

    /// The codec was closed locally.
    #[error("codec closed")]
    Closed,

    /// A value could not be encoded.
    #[error("encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// A value could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

impl FrameError {
    /// True when the peer went away cleanly between messages.
    pub fn is_eof(&self) -> bool {
        matches!(self, FrameError::ConnectionClosed)
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
