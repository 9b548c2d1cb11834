/// Errors reported by the sample ring.
#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    /// The ring has no backing region yet.
    #[error("sample buffer is not initialized")]
    NotInitialized,

    /// The requested range ends past the newest published sample.
    #[error("samples up to {end} requested, only {available} written so far")]
    NotYetAvailable { end: u64, available: u64 },

    /// The requested range starts before the oldest sample still held.
    ///
    /// Also reported when a read raced with a pocket being overwritten.
    #[error("sample {start} has been overwritten (oldest available is {oldest})")]
    Retired { start: u64, oldest: u64 },

    /// `initialize` was called on a ring that already has a region.
    #[error("sample buffer is already initialized")]
    AlreadyInitialized,

    /// `start` is greater than `end`.
    #[error("invalid sample range {start}..{end}")]
    InvalidRange { start: u64, end: u64 },

    /// Shape parameters or a block's length do not fit the ring.
    #[error("invalid buffer layout: {0}")]
    InvalidLayout(String),

    /// The handle does not describe a sample region.
    #[error("region handle does not point at a sample region")]
    BadRegion,

    /// The backing memory could not be mapped.
    #[error("failed to allocate sample region: {0}")]
    Allocation(#[source] std::io::Error),
}

impl BufferError {
    /// Whether retrying the same read later can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, BufferError::NotYetAvailable { .. })
    }
}

pub type Result<T> = std::result::Result<T, BufferError>;
