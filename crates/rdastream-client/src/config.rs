use std::path::PathBuf;
use std::time::Duration;

use rdastream_frame::CodecConfig;

/// Default ring capacity in samples (10 minutes at 500 Hz).
pub const DEFAULT_BUFFER_CAPACITY: usize = 300_000;

/// Default number of arrival timestamps kept for diagnostics.
pub const DEFAULT_TIMELOG_CAPACITY: usize = 100_000;

/// Default file the diagnostic time log is written to.
pub const DEFAULT_TIMELOG_PATH: &str = "streamer_timelog.json";

/// Configuration for an [`RdaClient`](crate::RdaClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Ring capacity in samples (rows).
    pub buffer_capacity: usize,
    /// Rows the worker writes per pocket. Readers may see `Retired` for
    /// ranges within one pocket of the write position.
    pub pocket_size: usize,
    /// How long `start_streaming` waits for a Start message.
    pub handshake_timeout: Duration,
    /// Sleep between attempts in `wait` and `poll`.
    pub poll_interval: Duration,
    /// Socket read timeout while the worker runs. Bounds how long a silent
    /// server can delay a stop request. `None` blocks indefinitely.
    pub worker_read_timeout: Option<Duration>,
    /// Pause after the server sends Stop.
    pub stop_settle: Duration,
    /// Arrival timestamps kept for diagnostics.
    pub timelog_capacity: usize,
    /// Where `save_timelog` writes.
    pub timelog_path: PathBuf,
    /// Mask SIGINT on the worker thread.
    pub suppress_interrupts: bool,
    /// Frame codec limits.
    pub codec: CodecConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            pocket_size: 1,
            handshake_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_micros(500),
            worker_read_timeout: Some(Duration::from_millis(100)),
            stop_settle: Duration::from_millis(500),
            timelog_capacity: DEFAULT_TIMELOG_CAPACITY,
            timelog_path: PathBuf::from(DEFAULT_TIMELOG_PATH),
            suppress_interrupts: true,
            codec: CodecConfig::default(),
        }
    }
}

/// Everything a streaming worker needs besides its stream, ring and
/// control channel.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Channel count of the session, from the Start message.
    pub channels: usize,
    /// Span the worker thread enters for its whole lifetime.
    pub span: tracing::Span,
    pub suppress_interrupts: bool,
    pub stop_settle: Duration,
    pub timelog_capacity: usize,
    pub timelog_path: PathBuf,
    pub codec: CodecConfig,
}

impl WorkerConfig {
    /// Derive a worker configuration from the client's.
    pub fn from_client(config: &ClientConfig, channels: usize, span: tracing::Span) -> Self {
        Self {
            channels,
            span,
            suppress_interrupts: config.suppress_interrupts,
            stop_settle: config.stop_settle,
            timelog_capacity: config.timelog_capacity,
            timelog_path: config.timelog_path.clone(),
            codec: config.codec.clone(),
        }
    }
}
