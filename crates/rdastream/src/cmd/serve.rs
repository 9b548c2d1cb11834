use std::f64::consts::TAU;
use std::io::{self, Read};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use rdastream_frame::{
    DataMessage, MessageHeader, MessageKind, MessageWriter, ProtocolError, StartMessage,
    HEADER_SIZE,
};
use serde::Serialize;

use crate::cmd::{install_ctrlc_handler, parse_duration, ServeArgs};
use crate::exit::{io_error, protocol_error, CliResult, SUCCESS};
use crate::output::{print_json, OutputFormat};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);
const DRAIN_SLICE: Duration = Duration::from_millis(200);
const UNDOCUMENTED_BODY: &[u8] = &[0x52, 0x44, 0x41, 0x00, 0, 0, 0, 0];
const AMPLITUDE_UV: f64 = 50.0;

#[derive(Serialize)]
struct ListeningOutput {
    listening: String,
}

#[derive(Serialize)]
struct SessionOutput {
    peer: String,
    blocks: u64,
    outcome: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// The configured number of blocks was sent, followed by Stop.
    Completed,
    /// The client closed the connection.
    ClientLeft,
    /// Ctrl+C.
    Interrupted,
}

impl SessionEnd {
    fn as_str(self) -> &'static str {
        match self {
            SessionEnd::Completed => "completed",
            SessionEnd::ClientLeft => "client-left",
            SessionEnd::Interrupted => "interrupted",
        }
    }
}

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let block_interval = parse_duration(&args.block_interval)?;
    let listener = TcpListener::bind(&args.bind).map_err(|err| io_error("bind failed", err))?;
    let local = listener
        .local_addr()
        .map_err(|err| io_error("bind failed", err))?;
    listener
        .set_nonblocking(true)
        .map_err(|err| io_error("bind failed", err))?;
    print_listening(local, format);
    tracing::info!(addr = %local, "mock rda server listening");

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    while running.load(Ordering::SeqCst) {
        let (conn, peer) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_BACKOFF);
                continue;
            }
            Err(err) => return Err(io_error("accept failed", err)),
        };
        conn.set_nonblocking(false)
            .map_err(|err| io_error("accept failed", err))?;
        conn.set_nodelay(true)
            .map_err(|err| io_error("accept failed", err))?;
        tracing::info!(%peer, "client connected");

        let mut session = Session::new(&args, block_interval);
        let end = session.serve(MessageWriter::new(conn), &running)?;
        tracing::info!(%peer, blocks = session.sent, outcome = end.as_str(), "session ended");
        print_session(
            &SessionOutput {
                peer: peer.to_string(),
                blocks: session.sent,
                outcome: end.as_str(),
            },
            format,
        );

        if args.once {
            break;
        }
    }

    Ok(SUCCESS)
}

struct Session<'a> {
    args: &'a ServeArgs,
    block_interval: Duration,
    source: SineSource,
    sent: u64,
}

impl<'a> Session<'a> {
    fn new(args: &'a ServeArgs, block_interval: Duration) -> Self {
        Self {
            args,
            block_interval,
            source: SineSource::new(args.channels as usize, args.sampling_interval, args.points),
            sent: 0,
        }
    }

    fn serve(
        &mut self,
        mut writer: MessageWriter<TcpStream>,
        running: &AtomicBool,
    ) -> CliResult<SessionEnd> {
        match self.stream_blocks(&mut writer, running) {
            Ok(SessionEnd::Completed) => {
                wait_for_close(writer.get_ref(), running);
                Ok(SessionEnd::Completed)
            }
            Ok(end) => Ok(end),
            Err(ProtocolError::Io(err)) if is_disconnect(&err) => Ok(SessionEnd::ClientLeft),
            Err(err) => Err(protocol_error("send failed", err)),
        }
    }

    fn stream_blocks(
        &mut self,
        writer: &mut MessageWriter<TcpStream>,
        running: &AtomicBool,
    ) -> Result<SessionEnd, ProtocolError> {
        writer.write_start(&self.start_message())?;

        while running.load(Ordering::SeqCst) {
            if self.args.blocks.is_some_and(|limit| self.sent >= limit) {
                writer.write_stop()?;
                return Ok(SessionEnd::Completed);
            }
            let every = self.args.undocumented_every;
            if every > 0 && self.sent % every == 0 {
                let size = (HEADER_SIZE + UNDOCUMENTED_BODY.len()) as u32;
                writer.write_raw(
                    &MessageHeader::new(MessageKind::Undocumented, size),
                    UNDOCUMENTED_BODY,
                )?;
            }
            // Block numbers wrap like the u32 wire field.
            writer.write_data(&self.source.next_block(self.sent as u32))?;
            self.sent += 1;
            thread::sleep(self.block_interval);
        }
        Ok(SessionEnd::Interrupted)
    }

    fn start_message(&self) -> StartMessage {
        let channels = self.args.channels as usize;
        StartMessage {
            sampling_interval: self.args.sampling_interval,
            resolutions: vec![self.args.resolution; channels],
            channel_names: (0..channels).map(|ch| format!("Ch{}", ch + 1)).collect(),
        }
    }
}

/// Synthetic signal: channel `c` carries a `c + 1` Hz sine offset by `10 * c`.
struct SineSource {
    channels: usize,
    interval_s: f64,
    points: u32,
    next_sample: u64,
}

impl SineSource {
    fn new(channels: usize, sampling_interval_us: f64, points: u32) -> Self {
        Self {
            channels,
            interval_s: sampling_interval_us / 1_000_000.0,
            points,
            next_sample: 0,
        }
    }

    fn next_block(&mut self, block_number: u32) -> DataMessage {
        let first = self.next_sample;
        let mut samples = Vec::with_capacity(self.points as usize * self.channels);
        for row in 0..u64::from(self.points) {
            let t = (first + row) as f64 * self.interval_s;
            for ch in 0..self.channels {
                let freq = (ch + 1) as f64;
                let value = AMPLITUDE_UV * (TAU * freq * t).sin() + 10.0 * ch as f64;
                samples.push(value as f32);
            }
        }
        self.next_sample += u64::from(self.points);

        DataMessage {
            block_number,
            points: self.points,
            channels: self.channels,
            samples,
            markers: Bytes::new(),
        }
    }
}

/// Hold the connection open after Stop until the client hangs up, so its
/// worker sees the Stop frame rather than a reset.
fn wait_for_close(conn: &TcpStream, running: &AtomicBool) {
    if conn.set_read_timeout(Some(DRAIN_SLICE)).is_err() {
        return;
    }
    let mut reader = conn;
    let mut scratch = [0u8; 256];
    while running.load(Ordering::SeqCst) {
        match reader.read(&mut scratch) {
            Ok(0) => return,
            Ok(_) => {}
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) => {}
            Err(_) => return,
        }
    }
}

fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::WriteZero
    )
}

fn print_listening(addr: SocketAddr, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&ListeningOutput {
            listening: addr.to_string(),
        }),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("listening on {addr}");
        }
    }
}

fn print_session(out: &SessionOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!(
                "session peer={} blocks={} outcome={}",
                out.peer, out.blocks, out.outcome
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sine_source_is_continuous_across_blocks() {
        let mut source = SineSource::new(2, 1000.0, 5);
        let first = source.next_block(0);
        let second = source.next_block(1);

        assert_eq!(first.samples.len(), 10);
        assert_eq!(second.block_number, 1);
        // t = 0: sine is zero, only the channel offset remains.
        assert_eq!(first.samples[0], 0.0);
        assert_eq!(first.samples[1], 10.0);
        // Sample 5 sits at t = 5ms on the 1 Hz channel.
        let expected = (AMPLITUDE_UV * (TAU * 0.005).sin()) as f32;
        assert!((second.samples[0] - expected).abs() < 1e-4);
    }

    #[test]
    fn disconnect_kinds() {
        assert!(is_disconnect(&io::Error::from(io::ErrorKind::BrokenPipe)));
        assert!(is_disconnect(&io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(!is_disconnect(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }
}
