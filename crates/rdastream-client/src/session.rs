use std::fmt;
use std::io::Read;
use std::time::{Duration, Instant};

use rdastream_frame::{MessageKind, MessageReader, ProtocolError, StartMessage};
use tracing::{info, warn};

use crate::error::{ClientError, Result, SessionError};

/// Where a client is in its session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No session has been started yet.
    Idle,
    /// Waiting for a Start message (or resumed data) from the server.
    AwaitingStart,
    /// Data arrived for the cached session; the ring and worker are being
    /// set up again.
    Resuming,
    /// A worker has been spawned and feeds the ring.
    Streaming,
    /// The last session was stopped.
    Stopped,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::AwaitingStart => "awaiting-start",
            SessionState::Resuming => "resuming",
            SessionState::Streaming => "streaming",
            SessionState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the server (re)opened a session.
#[derive(Debug, Clone, PartialEq)]
pub enum HandshakeOutcome {
    /// A Start message arrived.
    Started(StartMessage),
    /// Data arrived while a previous Start message is cached; the server is
    /// continuing the earlier session.
    Resumed,
}

impl HandshakeOutcome {
    /// State held while the worker for this outcome is being set up.
    pub fn pending_state(&self) -> SessionState {
        match self {
            HandshakeOutcome::Started(_) => SessionState::AwaitingStart,
            HandshakeOutcome::Resumed => SessionState::Resuming,
        }
    }
}

/// Read frames until the server opens or resumes a session.
///
/// `resumable` tells whether Start metadata from an earlier session is
/// cached; only then does a Data frame count as a resume. Every other frame
/// is discarded. The underlying stream should have a short read timeout so
/// the deadline is honoured while the server is silent.
///
/// The deadline also applies inside a frame: the reader's stall check is
/// replaced so a server that stops half way through a frame still ends in
/// [`SessionError::HandshakeTimeout`]. The stream is then no longer aligned
/// on a frame boundary.
pub fn await_start<R: Read>(
    reader: &mut MessageReader<R>,
    resumable: bool,
    timeout: Duration,
) -> Result<HandshakeOutcome> {
    info!("waiting for an rda start message");
    let deadline = Instant::now() + timeout;
    reader.set_stall_check(move || Instant::now() >= deadline);

    match read_until_start(reader, resumable, deadline, timeout) {
        Err(ClientError::Protocol(ProtocolError::Stalled { expected, received })) => {
            warn!(
                expected,
                received, "handshake deadline passed inside a frame; connection is out of sync"
            );
            Err(SessionError::HandshakeTimeout(timeout).into())
        }
        other => other,
    }
}

fn read_until_start<R: Read>(
    reader: &mut MessageReader<R>,
    resumable: bool,
    deadline: Instant,
    timeout: Duration,
) -> Result<HandshakeOutcome> {
    loop {
        if Instant::now() >= deadline {
            return Err(SessionError::HandshakeTimeout(timeout).into());
        }

        let header = match reader.read_header() {
            Ok(header) => header,
            Err(err) if err.is_timeout() => continue,
            Err(err) => return Err(err.into()),
        };
        if let Some(err) = header.signature_error() {
            warn!(error = %err, kind = %header.kind, "packet with unknown signature received");
        }

        match header.kind {
            MessageKind::Start => {
                let start = reader.read_start(&header)?;
                info!(
                    channels = start.channels(),
                    sampling_interval = start.sampling_interval,
                    "start message received"
                );
                return Ok(HandshakeOutcome::Started(start));
            }
            MessageKind::Data if resumable => {
                reader.skip_body(&header)?;
                info!("trying to resume previous session");
                return Ok(HandshakeOutcome::Resumed);
            }
            kind => {
                let len = reader.skip_body(&header)?;
                info!(%kind, len, "skipped packet");
            }
        }
    }
}
