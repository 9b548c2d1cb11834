/// Errors that can occur while decoding or encoding RDA frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// A fixed-size section arrived incomplete; the connection is broken.
    #[error("short read: expected {expected} bytes, received {received}")]
    ShortRead { expected: usize, received: usize },

    /// The stream closed while a variable-length region was being received.
    #[error("truncated frame: expected {expected} bytes, received {received}")]
    Truncated { expected: usize, received: usize },

    /// The frame signature does not match the RDA GUID.
    ///
    /// Only ever reported as a warning; decoding continues.
    #[error("unknown frame signature {found:02x?}")]
    SignatureMismatch { found: [u8; 16] },

    /// The declared frame size cannot hold the sections it announces.
    #[error("invalid frame size {size} (needs at least {minimum})")]
    InvalidSize { size: usize, minimum: usize },

    /// A signed count field carried a negative value.
    #[error("negative {field}: {value}")]
    NegativeField { field: &'static str, value: i32 },

    /// The declared frame size exceeds the configured maximum.
    #[error("frame too large ({size} bytes, max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// A Data frame was decoded before any Start frame established the channel count.
    #[error("data frame received before the channel count is known")]
    MissingChannelCount,

    /// Reads timed out part way through a frame and the reader's stall check
    /// asked it to give up.
    ///
    /// The stream is left inside the frame and cannot be resynchronised.
    #[error("frame stalled after {received} of {expected} bytes")]
    Stalled { expected: usize, received: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// True when a read timed out before any byte of a new frame arrived.
    ///
    /// The stream is still aligned on a frame boundary, so the caller may
    /// simply retry.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ProtocolError::Io(err)
                if err.kind() == std::io::ErrorKind::WouldBlock
                    || err.kind() == std::io::ErrorKind::TimedOut
        )
    }
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
