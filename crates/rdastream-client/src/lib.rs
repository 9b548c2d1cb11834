//! Streaming client for RDA (Remote Data Access) servers.
//!
//! [`RdaClient`] connects to a server, waits for the session Start message
//! and then runs a [`StreamingWorker`] on a background thread. The worker
//! drains the socket into a shared [`RingBuffer`](rdastream_ring::RingBuffer);
//! the client reads from the same ring without ever blocking the worker.
//!
//! The two threads share nothing else: commands travel over a one-way
//! control channel and the worker's logging context and signal mask are
//! set from an explicit [`WorkerConfig`].

pub mod client;
pub mod config;
pub mod control;
pub mod error;
pub mod session;
pub mod signal;
pub mod timelog;
pub mod worker;

pub use client::RdaClient;
pub use config::{ClientConfig, WorkerConfig, DEFAULT_BUFFER_CAPACITY, DEFAULT_TIMELOG_PATH};
pub use control::{control_channel, ControlCommand, ControlDisconnected, ControlReceiver, ControlSender};
pub use error::{ClientError, Result, SessionError};
pub use session::{await_start, HandshakeOutcome, SessionState};
pub use timelog::{load_timelog, TimeLog, TimeLogExport, TIMELOG_FORMAT};
pub use worker::{StreamingWorker, WorkerExit, WorkerHandle, WorkerSummary, WORKER_THREAD_NAME};
