/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to connect to the specified address.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    /// The address did not resolve to anything connectable.
    #[error("address {0} did not resolve")]
    Resolve(String),

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// The underlying I/O error kind, when there is one.
    pub fn io_kind(&self) -> Option<std::io::ErrorKind> {
        match self {
            TransportError::Connect { source, .. } | TransportError::Io(source) => {
                Some(source.kind())
            }
            TransportError::Resolve(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
