use std::collections::VecDeque;
use std::io::Read;
use std::thread::{self, JoinHandle};

use rdastream_frame::{DataMessage, MessageKind, MessageReader, ProtocolError};
use rdastream_ring::RingBuffer;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::control::{control_channel, ControlCommand, ControlDisconnected, ControlReceiver, ControlSender};
use crate::error::{ClientError, Result};
use crate::signal;
use crate::timelog::TimeLog;

/// Name of the worker thread.
pub const WORKER_THREAD_NAME: &str = "rda-streamer";

/// Why the worker left its receive loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// A `stop` command was received, from the client or after a server Stop.
    StopCommand,
    /// Every control sender was dropped.
    ControlDisconnected,
    /// A fatal socket or decoding error ended the session.
    Failed(String),
}

/// What a finished worker reports back.
#[derive(Debug, Clone)]
pub struct WorkerSummary {
    /// Data blocks stored in the ring.
    pub blocks: u64,
    /// Sample rows stored in the ring.
    pub samples: u64,
    pub exit: WorkerExit,
    /// Whether a `save_timelog` command completed.
    pub timelog_saved: bool,
    /// Arrival times of the last data blocks.
    pub timelog: TimeLog,
}

/// Socket-draining loop that feeds the sample ring.
///
/// Reads frames until told to stop, stores every Data block in the ring and
/// records its arrival time. Commands arrive over a [`ControlSender`]
/// obtained from [`StreamingWorker::new`]. A Stop sent while the server has
/// stalled half way through a frame abandons that frame.
pub struct StreamingWorker<R> {
    reader: MessageReader<R>,
    ring: RingBuffer,
    control: ControlReceiver,
    /// Commands the worker queued for itself; served before the channel.
    own_queue: VecDeque<ControlCommand>,
    config: WorkerConfig,
    timelog: TimeLog,
    blocks: u64,
    samples: u64,
    timelog_saved: bool,
}

/// A worker running on its own thread.
#[derive(Debug)]
pub struct WorkerHandle {
    thread: JoinHandle<WorkerSummary>,
    control: ControlSender,
}

impl<R: Read> StreamingWorker<R> {
    /// Build a worker reading from `stream` and writing into `ring`.
    ///
    /// `ring` must be attached to a region whose channel count matches
    /// `config.channels`.
    pub fn new(stream: R, ring: RingBuffer, config: WorkerConfig) -> (Self, ControlSender) {
        let (tx, rx) = control_channel();
        let reader = MessageReader::with_config(stream, config.codec.clone())
            .with_stall_check(rx.stop_signal());
        let worker = Self {
            reader,
            ring,
            control: rx,
            own_queue: VecDeque::new(),
            timelog: TimeLog::new(config.timelog_capacity),
            config,
            blocks: 0,
            samples: 0,
            timelog_saved: false,
        };
        (worker, tx)
    }

    /// Run the receive loop on the calling thread until stopped.
    pub fn run(mut self) -> WorkerSummary {
        let span = self.config.span.clone();
        let _entered = span.enter();

        if self.config.suppress_interrupts {
            if let Err(err) = signal::block_interrupts() {
                warn!(error = %err, "failed to mask interrupts on worker thread");
            }
        }

        info!(channels = self.config.channels, "started streaming");
        let exit = self.receive_loop();

        match &exit {
            WorkerExit::Failed(reason) => error!(%reason, "streaming failed"),
            WorkerExit::StopCommand | WorkerExit::ControlDisconnected => {
                info!(blocks = self.blocks, samples = self.samples, "stopped streaming");
            }
        }

        // One pending command may still be queued behind the stop.
        if let Ok(Some(command)) = self.next_command() {
            self.execute(command);
        }

        WorkerSummary {
            blocks: self.blocks,
            samples: self.samples,
            exit,
            timelog_saved: self.timelog_saved,
            timelog: self.timelog,
        }
    }

    fn receive_loop(&mut self) -> WorkerExit {
        loop {
            let stalled = match self.receive_one() {
                Ok(()) => None,
                Err(ClientError::Protocol(err)) if err.is_timeout() => None,
                Err(ClientError::Protocol(err @ ProtocolError::Stalled { .. })) => {
                    info!(error = %err, "abandoning partial frame");
                    Some(err.to_string())
                }
                Err(err) => return WorkerExit::Failed(err.to_string()),
            };

            loop {
                match self.next_command() {
                    Ok(Some(ControlCommand::Stop)) => return WorkerExit::StopCommand,
                    Ok(Some(command)) => self.execute(command),
                    Ok(None) => break,
                    Err(ControlDisconnected) => return WorkerExit::ControlDisconnected,
                }
            }

            // The stream is mid-frame; there is no way back to a boundary.
            if let Some(reason) = stalled {
                return WorkerExit::Failed(reason);
            }
        }
    }

    fn receive_one(&mut self) -> Result<()> {
        let header = self.reader.read_header()?;
        if let Some(err) = header.signature_error() {
            warn!(error = %err, kind = %header.kind, "packet with unknown signature received");
        }

        match header.kind {
            MessageKind::Data => {
                let data = self.reader.read_data(&header, self.config.channels)?;
                self.store(&data)?;
            }
            MessageKind::Stop => {
                self.reader.skip_body(&header)?;
                info!("stop message received, stopping");
                self.own_queue.push_back(ControlCommand::Stop);
                thread::sleep(self.config.stop_settle);
            }
            MessageKind::Undocumented => {
                self.reader.skip_body(&header)?;
            }
            kind => {
                let len = self.reader.skip_body(&header)?;
                info!(%kind, len, "skipped packet");
            }
        }
        Ok(())
    }

    fn store(&mut self, data: &DataMessage) -> Result<()> {
        let total = self.ring.put(&data.samples)?;
        self.timelog.record_now();
        self.blocks += 1;
        self.samples += u64::from(data.points);
        debug!(
            block = data.block_number,
            points = data.points,
            total,
            "put data block"
        );
        Ok(())
    }

    fn next_command(&mut self) -> std::result::Result<Option<ControlCommand>, ControlDisconnected> {
        if let Some(command) = self.own_queue.pop_front() {
            return Ok(Some(command));
        }
        self.control.try_recv()
    }

    /// Run a non-stop command. Failures are logged, never fatal.
    fn execute(&mut self, command: ControlCommand) {
        match command {
            ControlCommand::Stop => {}
            ControlCommand::SaveTimelog => match self.timelog.save(&self.config.timelog_path) {
                Ok(()) => {
                    self.timelog_saved = true;
                    info!(path = %self.config.timelog_path.display(), entries = self.timelog.len(), "time log saved");
                }
                Err(err) => warn!(error = %err, %command, "unable to execute command"),
            },
        }
    }
}

impl<R: Read + Send + 'static> StreamingWorker<R> {
    /// Start the worker on a dedicated thread.
    pub fn spawn(self, control: ControlSender) -> Result<WorkerHandle> {
        let thread = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || self.run())?;
        Ok(WorkerHandle { thread, control })
    }
}

impl WorkerHandle {
    /// Queue a command for the worker.
    pub fn send(&self, command: ControlCommand) -> std::result::Result<(), ControlDisconnected> {
        self.control.send(command)
    }

    /// Another sender for the same worker.
    pub fn control(&self) -> ControlSender {
        self.control.clone()
    }

    /// Whether the worker thread has returned.
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the worker to return.
    pub fn join(self) -> Result<WorkerSummary> {
        self.thread.join().map_err(|_| ClientError::WorkerPanicked)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::time::Duration;

    use bytes::{Bytes, BytesMut};
    use rdastream_frame::{encode_data, encode_header, encode_stop, MessageHeader, HEADER_SIZE};
    use rdastream_ring::SampleFormat;

    use super::*;

    const CHANNELS: usize = 2;

    fn config() -> WorkerConfig {
        WorkerConfig {
            channels: CHANNELS,
            span: tracing::Span::none(),
            suppress_interrupts: false,
            stop_settle: Duration::ZERO,
            timelog_capacity: 16,
            timelog_path: std::env::temp_dir().join("rdastream-worker-unused.json"),
            codec: Default::default(),
        }
    }

    fn ring(capacity: usize) -> RingBuffer {
        let mut ring = RingBuffer::new();
        ring.initialize(CHANNELS, capacity, 1, SampleFormat::Float32)
            .unwrap();
        ring
    }

    fn data(block: u32, first: f32) -> DataMessage {
        DataMessage {
            block_number: block,
            points: 2,
            channels: CHANNELS,
            samples: vec![first, first + 1.0, first + 2.0, first + 3.0],
            markers: Bytes::new(),
        }
    }

    #[test]
    fn drains_until_server_stop() {
        let mut wire = BytesMut::new();
        encode_data(&data(1, 0.0), &mut wire).unwrap();
        encode_header(
            &MessageHeader::new(MessageKind::Undocumented, (HEADER_SIZE + 6) as u32),
            &mut wire,
        );
        wire.extend_from_slice(&[0; 6]);
        encode_header(&MessageHeader::new(MessageKind::Other(42), HEADER_SIZE as u32), &mut wire);
        encode_data(&data(2, 10.0), &mut wire).unwrap();
        encode_stop(&mut wire);
        // Never reached.
        encode_data(&data(3, 20.0), &mut wire).unwrap();

        let owner = ring(100);
        let writer = RingBuffer::attach(owner.handle().unwrap()).unwrap();
        let (worker, _tx) = StreamingWorker::new(Cursor::new(wire.to_vec()), writer, config());

        let summary = worker.run();
        assert_eq!(summary.exit, WorkerExit::StopCommand);
        assert_eq!(summary.blocks, 2);
        assert_eq!(summary.samples, 4);
        assert_eq!(summary.timelog.len(), 2);
        assert_eq!(owner.total_written(), 4);
        assert_eq!(
            owner.get(0, 4).unwrap().to_vec(),
            vec![0.0, 1.0, 2.0, 3.0, 10.0, 11.0, 12.0, 13.0]
        );
    }

    #[test]
    fn truncated_stream_fails_the_session() {
        let mut wire = BytesMut::new();
        encode_data(&data(1, 0.0), &mut wire).unwrap();
        encode_data(&data(2, 0.0), &mut wire).unwrap();
        wire.truncate(wire.len() - 5);

        let (worker, _tx) =
            StreamingWorker::new(Cursor::new(wire.to_vec()), ring(10), config());
        let summary = worker.run();
        assert_eq!(summary.blocks, 1);
        assert!(matches!(summary.exit, WorkerExit::Failed(ref reason) if reason.contains("truncated")));
    }

    #[test]
    fn eof_between_frames_is_a_short_read() {
        let mut wire = BytesMut::new();
        encode_data(&data(1, 0.0), &mut wire).unwrap();

        let (worker, _tx) =
            StreamingWorker::new(Cursor::new(wire.to_vec()), ring(10), config());
        let summary = worker.run();
        assert!(matches!(summary.exit, WorkerExit::Failed(ref reason) if reason.contains("short read")));
    }

    #[test]
    fn stop_command_then_one_pending_command() {
        let dir = std::env::temp_dir().join(format!(
            "rdaw-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");

        let mut wire = BytesMut::new();
        encode_data(&data(1, 0.0), &mut wire).unwrap();
        encode_data(&data(2, 0.0), &mut wire).unwrap();

        let cfg = WorkerConfig {
            timelog_path: dir.join("timelog.json"),
            ..config()
        };
        let (worker, tx) = StreamingWorker::new(Cursor::new(wire.to_vec()), ring(10), cfg);
        tx.send(ControlCommand::Stop).unwrap();
        tx.send(ControlCommand::SaveTimelog).unwrap();

        let summary = worker.run();
        assert_eq!(summary.exit, WorkerExit::StopCommand);
        assert_eq!(summary.blocks, 1);
        assert!(summary.timelog_saved);
        let saved = crate::timelog::load_timelog(&dir.join("timelog.json")).unwrap();
        assert_eq!(saved.timestamps.len(), 1);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn failed_export_does_not_prevent_shutdown() {
        let mut wire = BytesMut::new();
        encode_data(&data(1, 0.0), &mut wire).unwrap();

        let cfg = WorkerConfig {
            timelog_path: std::path::PathBuf::from("/nonexistent-dir/rdastream/timelog.json"),
            ..config()
        };
        let (worker, tx) = StreamingWorker::new(Cursor::new(wire.to_vec()), ring(10), cfg);
        tx.send(ControlCommand::SaveTimelog).unwrap();
        tx.send(ControlCommand::Stop).unwrap();

        let summary = worker.run();
        assert_eq!(summary.exit, WorkerExit::StopCommand);
        assert!(!summary.timelog_saved);
    }

    #[test]
    fn dropped_control_ends_the_loop() {
        let mut wire = BytesMut::new();
        encode_data(&data(1, 0.0), &mut wire).unwrap();

        let (worker, tx) = StreamingWorker::new(Cursor::new(wire.to_vec()), ring(10), config());
        drop(tx);
        let summary = worker.run();
        assert_eq!(summary.exit, WorkerExit::ControlDisconnected);
        assert_eq!(summary.blocks, 1);
    }

    #[test]
    fn stop_observed_while_server_is_silent() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::net::TcpStream::connect(addr).unwrap();
        let (_server, _) = listener.accept().unwrap();
        client
            .set_read_timeout(Some(Duration::from_millis(20)))
            .unwrap();

        let (worker, tx) = StreamingWorker::new(client, ring(10), config());
        let handle = worker.spawn(tx).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());

        handle.send(ControlCommand::Stop).unwrap();
        let summary = handle.join().unwrap();
        assert_eq!(summary.exit, WorkerExit::StopCommand);
        assert_eq!(summary.blocks, 0);
    }

    #[test]
    fn stop_abandons_a_stalled_frame() {
        use std::io::Write;

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::net::TcpStream::connect(addr).unwrap();
        let (mut server, _) = listener.accept().unwrap();
        client
            .set_read_timeout(Some(Duration::from_millis(20)))
            .unwrap();

        let mut wire = BytesMut::new();
        encode_data(&data(1, 0.0), &mut wire).unwrap();
        encode_data(&data(2, 0.0), &mut wire).unwrap();
        let first_len = wire.len() / 2;
        // One whole block, then ten bytes of the next header and silence.
        server.write_all(&wire[..first_len + 10]).unwrap();

        let (worker, tx) = StreamingWorker::new(client, ring(10), config());
        let handle = worker.spawn(tx).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        assert!(!handle.is_finished());

        let stop_sent = std::time::Instant::now();
        handle.send(ControlCommand::Stop).unwrap();
        let summary = handle.join().unwrap();
        assert!(stop_sent.elapsed() < Duration::from_secs(1));
        assert_eq!(summary.exit, WorkerExit::StopCommand);
        assert_eq!(summary.blocks, 1);
        drop(server);
    }
}
