use std::fmt;
use std::net::ToSocketAddrs;
use std::thread;
use std::time::{Duration, Instant};

use rdastream_frame::{MessageReader, StartMessage};
use rdastream_ring::{RegionHandle, RingBuffer, SampleFormat, Samples};
use rdastream_transport::RdaStream;
use tracing::{debug, info, info_span, warn};

use crate::config::{ClientConfig, WorkerConfig};
use crate::control::ControlCommand;
use crate::error::{Result, SessionError};
use crate::session::{await_start, HandshakeOutcome, SessionState};
use crate::worker::{StreamingWorker, WorkerHandle, WorkerSummary};

/// Upper bound on a single blocking read during the handshake, so the
/// handshake deadline is checked while the server is silent.
const HANDSHAKE_READ_SLICE: Duration = Duration::from_millis(50);

/// Client for an RDA server.
///
/// The client owns the connection and the sample ring. `start_streaming`
/// performs the handshake on the calling thread and then hands a duplicate of
/// the socket to a background worker that stores every data block in the
/// ring. Reads (`get_data`, `wait`, `poll`) never block the worker.
///
/// ```no_run
/// use std::time::Duration;
/// use rdastream_client::RdaClient;
///
/// let mut client = RdaClient::new();
/// client.connect("127.0.0.1:51244")?;
/// client.start_streaming(Duration::from_secs(10))?;
/// if let Some(window) = client.poll(500, Duration::from_secs(1), Duration::from_micros(500))? {
///     println!("{} rows ending at {}", window.rows(), window.end_index());
/// }
/// client.stop_streaming(false)?;
/// client.disconnect()?;
/// # Ok::<(), rdastream_client::ClientError>(())
/// ```
pub struct RdaClient {
    config: ClientConfig,
    stream: Option<RdaStream>,
    ring: RingBuffer,
    state: SessionState,
    start_msg: Option<StartMessage>,
    worker: Option<WorkerHandle>,
    sessions: u64,
}

impl Default for RdaClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RdaClient {
    /// Create a client with default configuration.
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    /// Create a client with explicit configuration.
    pub fn with_config(config: ClientConfig) -> Self {
        Self {
            config,
            stream: None,
            ring: RingBuffer::new(),
            state: SessionState::Idle,
            start_msg: None,
            worker: None,
            sessions: 0,
        }
    }

    /// Connect to an RDA server over TCP.
    pub fn connect(&mut self, addr: impl ToSocketAddrs + fmt::Debug) -> Result<()> {
        let stream = RdaStream::connect(addr)?;
        self.connect_stream(stream)
    }

    /// Use an already connected stream.
    ///
    /// Replaces (and closes) any previous connection. Fails while a session
    /// is running.
    pub fn connect_stream(&mut self, stream: RdaStream) -> Result<()> {
        if self.is_streaming() {
            return Err(SessionError::AlreadyStreaming.into());
        }
        if let Some(old) = self.stream.replace(stream) {
            old.shutdown()?;
        }
        if let Some(stream) = &self.stream {
            info!(peer = %stream.peer_label(), transport = stream.transport_name(), "connected");
        }
        Ok(())
    }

    /// Wait for the server to open (or resume) a session, then start the
    /// background worker.
    ///
    /// On the first Start message the ring is allocated from the announced
    /// channel count and the configured capacity and pocket size. Resumed
    /// data moves the state to [`SessionState::Resuming`] until the worker
    /// runs; any failure restores the state held before the call.
    ///
    /// A Start message is only cached once its ring layout is in place.
    pub fn start_streaming(&mut self, timeout: Duration) -> Result<()> {
        if self.is_streaming() {
            return Err(SessionError::AlreadyStreaming.into());
        }
        self.reap_finished_worker();

        let stream = self.stream.as_ref().ok_or(SessionError::NotConnected)?;
        let previous = self.state;
        self.state = SessionState::AwaitingStart;

        let outcome = Self::handshake(stream, &self.config, self.start_msg.is_some(), timeout);
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                self.state = previous;
                return Err(err);
            }
        };

        self.state = outcome.pending_state();
        if let Err(err) = self.prepare_session(outcome).and_then(|()| self.spawn_worker()) {
            self.state = previous;
            return Err(err);
        }
        self.state = SessionState::Streaming;
        Ok(())
    }

    fn handshake(
        stream: &RdaStream,
        config: &ClientConfig,
        resumable: bool,
        timeout: Duration,
    ) -> Result<HandshakeOutcome> {
        let slice = timeout.clamp(Duration::from_millis(1), HANDSHAKE_READ_SLICE);
        stream.set_read_timeout(Some(slice))?;
        let mut reader = MessageReader::with_config(stream.try_clone()?, config.codec.clone());
        await_start(&mut reader, resumable, timeout)
    }

    fn prepare_session(&mut self, outcome: HandshakeOutcome) -> Result<()> {
        match outcome {
            HandshakeOutcome::Started(start) => {
                // A new Start replaces the cached session even if its layout
                // turns out to be unusable.
                self.start_msg = None;
                let channels = start.channels();
                if self.ring.is_initialized() && self.ring.channels() != channels {
                    warn!(
                        old = self.ring.channels(),
                        new = channels,
                        "channel count changed, allocating a new buffer"
                    );
                    self.ring = RingBuffer::new();
                }
                self.ensure_ring(channels)?;
                self.start_msg = Some(start);
            }
            HandshakeOutcome::Resumed => {
                let channels = self
                    .start_msg
                    .as_ref()
                    .map(StartMessage::channels)
                    .ok_or(SessionError::NotStreaming)?;
                self.ensure_ring(channels)?;
            }
        }
        Ok(())
    }

    fn ensure_ring(&mut self, channels: usize) -> Result<()> {
        if self.ring.is_initialized() {
            return Ok(());
        }
        info!(
            channels,
            capacity = self.config.buffer_capacity,
            pocket = self.config.pocket_size,
            "initializing buffer"
        );
        self.ring.initialize(
            channels,
            self.config.buffer_capacity,
            self.config.pocket_size,
            SampleFormat::Float32,
        )?;
        Ok(())
    }

    fn spawn_worker(&mut self) -> Result<()> {
        let stream = self.stream.as_ref().ok_or(SessionError::NotConnected)?;
        stream.set_read_timeout(self.config.worker_read_timeout)?;

        self.sessions += 1;
        let span = info_span!(
            "rda_streamer",
            peer = %stream.peer_label(),
            session = self.sessions
        );
        let worker_config = WorkerConfig::from_client(&self.config, self.ring.channels(), span);
        let ring = RingBuffer::attach(self.ring.handle()?)?;

        info!("spawning streaming worker");
        let (worker, control) = StreamingWorker::new(stream.try_clone()?, ring, worker_config);
        self.worker = Some(worker.spawn(control)?);
        Ok(())
    }

    /// Join a worker that already left its loop on its own (server Stop,
    /// socket failure).
    fn reap_finished_worker(&mut self) {
        if !self.worker.as_ref().is_some_and(WorkerHandle::is_finished) {
            return;
        }
        if let Some(worker) = self.worker.take() {
            match worker.join() {
                Ok(summary) => info!(exit = ?summary.exit, blocks = summary.blocks, "previous worker finished"),
                Err(err) => warn!(error = %err, "previous worker failed"),
            }
        }
        self.state = SessionState::Stopped;
    }

    /// Stop the worker and wait for it to exit.
    ///
    /// With `flush_timelog`, the worker writes its arrival time log before
    /// exiting. If the worker had already exited, the client writes it.
    pub fn stop_streaming(&mut self, flush_timelog: bool) -> Result<WorkerSummary> {
        if self.state != SessionState::Streaming {
            return Err(SessionError::NotStreaming.into());
        }
        let worker = self.worker.take().ok_or(SessionError::NotStreaming)?;

        // A worker that already exited has dropped its receiver.
        let _ = worker.send(ControlCommand::Stop);
        if flush_timelog {
            let _ = worker.send(ControlCommand::SaveTimelog);
        }
        let joined = worker.join();
        self.state = SessionState::Stopped;
        let summary = joined?;

        if flush_timelog && !summary.timelog_saved {
            match summary.timelog.save(&self.config.timelog_path) {
                Ok(()) => info!(path = %self.config.timelog_path.display(), "time log saved"),
                Err(err) => warn!(error = %err, "unable to save time log"),
            }
        }
        info!(blocks = summary.blocks, samples = summary.samples, "stopped streaming");
        Ok(summary)
    }

    /// Close the connection. Valid in any state.
    ///
    /// A running worker sees the socket close and exits; its summary is
    /// collected by the next `stop_streaming` or `start_streaming`.
    pub fn disconnect(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            stream.shutdown()?;
            info!("disconnected");
        }
        Ok(())
    }

    /// Samples `[start, end)`, or `None` if the range is unavailable for
    /// any reason.
    pub fn get_data(&self, start: u64, end: u64) -> Option<Samples<'_>> {
        match self.ring.get(start, end) {
            Ok(samples) => Some(samples),
            Err(err) => {
                debug!(start, end, error = %err, "data unavailable");
                None
            }
        }
    }

    /// Wait until `[start, end)` is available.
    ///
    /// Keeps polling while the range is not yet written; gives up at once if
    /// it has been overwritten. Returns `None` on timeout.
    pub fn wait(
        &self,
        start: u64,
        end: u64,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Option<Samples<'_>>> {
        self.require_streaming()?;
        let deadline = Instant::now() + timeout;
        loop {
            match self.ring.get(start, end) {
                Ok(samples) => return Ok(Some(samples)),
                Err(err) if err.is_transient() => {}
                Err(err) => {
                    debug!(start, end, error = %err, "requested range unreachable");
                    return Ok(None);
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            thread::sleep(poll_interval);
        }
    }

    /// Wait for at least one new sample, then return the latest `n_samples`
    /// rows ending at the new high-water mark.
    pub fn poll(
        &self,
        n_samples: u64,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Option<Samples<'_>>> {
        self.require_streaming()?;
        let last = self.last_sample_index();
        if self.wait(last, last + 1, timeout, poll_interval)?.is_none() {
            return Ok(None);
        }
        let last = self.last_sample_index();
        if last < n_samples {
            return Ok(None);
        }
        Ok(self.get_data(last - n_samples, last))
    }

    fn require_streaming(&self) -> Result<()> {
        if self.state == SessionState::Streaming {
            Ok(())
        } else {
            Err(SessionError::NotStreaming.into())
        }
    }

    /// True while a session is active and its worker is still running.
    pub fn is_streaming(&self) -> bool {
        self.state == SessionState::Streaming
            && self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Ring capacity in samples.
    pub fn buffer_capacity(&self) -> usize {
        if self.ring.is_initialized() {
            self.ring.capacity()
        } else {
            self.config.buffer_capacity
        }
    }

    /// Rows per pocket.
    pub fn pocket_size(&self) -> usize {
        if self.ring.is_initialized() {
            self.ring.pocket_size()
        } else {
            self.config.pocket_size
        }
    }

    /// Number of samples written so far; the next sample gets this index.
    pub fn last_sample_index(&self) -> u64 {
        self.ring.total_written()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Metadata of the current (or last) session.
    pub fn start_message(&self) -> Option<&StartMessage> {
        self.start_msg.as_ref()
    }

    /// Handle for attaching readers on other threads.
    pub fn buffer_handle(&self) -> Option<RegionHandle> {
        self.ring.handle().ok()
    }

    /// Sessions started by this client.
    pub fn session_count(&self) -> u64 {
        self.sessions
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

impl Drop for RdaClient {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.send(ControlCommand::Stop);
            if let Some(stream) = &self.stream {
                let _ = stream.shutdown();
            }
            if let Err(err) = worker.join() {
                warn!(error = %err, "streaming worker did not exit cleanly");
            }
        }
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown();
        }
    }
}

impl fmt::Debug for RdaClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RdaClient")
            .field("state", &self.state)
            .field("stream", &self.stream)
            .field("ring", &self.ring)
            .field("sessions", &self.sessions)
            .field("worker_running", &self.is_streaming())
            .finish()
    }
}
