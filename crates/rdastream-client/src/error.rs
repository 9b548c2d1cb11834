use std::time::Duration;

/// Misuse of the session state machine, or a handshake that never completed.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// `start_streaming` was called while a session is running.
    #[error("already streaming")]
    AlreadyStreaming,

    /// The operation needs a running session.
    #[error("not streaming")]
    NotStreaming,

    /// No Start message (or resumed data) arrived in time.
    #[error("no start message received within {0:?}")]
    HandshakeTimeout(Duration),

    /// The client has no connection to the server.
    #[error("not connected")]
    NotConnected,
}

/// Errors that can occur in client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Session state error.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Frame-level error.
    #[error("protocol error: {0}")]
    Protocol(#[from] rdastream_frame::ProtocolError),

    /// Sample ring error.
    #[error("buffer error: {0}")]
    Buffer(#[from] rdastream_ring::BufferError),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] rdastream_transport::TransportError),

    /// I/O error outside the socket (time log export, thread spawn).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The streaming worker thread panicked.
    #[error("streaming worker panicked")]
    WorkerPanicked,
}

pub type Result<T> = std::result::Result<T, ClientError>;
