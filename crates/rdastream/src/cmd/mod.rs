use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand};
use rdastream_client::{DEFAULT_BUFFER_CAPACITY, DEFAULT_TIMELOG_PATH};
use rdastream_frame::DEFAULT_MAX_FRAME_SIZE;

use crate::exit::{CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod info;
pub mod serve;
pub mod stream;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Stream from a server and print a summary of each sample window.
    Stream(StreamArgs),
    /// Perform the handshake and print the session metadata.
    Info(InfoArgs),
    /// Run a mock RDA server emitting synthetic data.
    Serve(ServeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Stream(args) => stream::run(args, format),
        Command::Info(args) => info::run(args, format),
        Command::Serve(args) => serve::run(args, format),
        Command::Version(args) => version::run(args, format),
    }
}

#[derive(Args, Debug)]
pub struct StreamArgs {
    /// Server address (host:port).
    #[arg(env = "RDASTREAM_ADDR")]
    pub addr: String,
    /// Samples per printed window.
    #[arg(long, default_value = "500", env = "RDASTREAM_WINDOW",
          value_parser = clap::value_parser!(u64).range(1..))]
    pub window: u64,
    /// Stop after this long (e.g. 30s, 2m). Default: until Ctrl+C or server Stop.
    #[arg(long, env = "RDASTREAM_DURATION")]
    pub duration: Option<String>,
    /// Ring capacity in samples.
    #[arg(long, default_value_t = DEFAULT_BUFFER_CAPACITY, env = "RDASTREAM_BUFFER_SIZE")]
    pub buffer_size: usize,
    /// Rows published per pocket.
    #[arg(long, default_value = "1", env = "RDASTREAM_POCKET")]
    pub pocket: usize,
    /// Handshake timeout (e.g. 10s, 500ms).
    #[arg(long, default_value = "10s", env = "RDASTREAM_TIMEOUT")]
    pub timeout: String,
    /// Sleep between ring polls (e.g. 500us, 1ms).
    #[arg(long, default_value = "500us", env = "RDASTREAM_POLL_INTERVAL")]
    pub poll_interval: String,
    /// Largest frame accepted from the server, in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_SIZE, env = "RDASTREAM_MAX_FRAME_SIZE")]
    pub max_frame_size: usize,
    /// Write the arrival time log when streaming stops.
    #[arg(long)]
    pub save_timelog: bool,
    /// Where the time log is written.
    #[arg(long, default_value = DEFAULT_TIMELOG_PATH, env = "RDASTREAM_TIMELOG_PATH")]
    pub timelog_path: PathBuf,
}

#[derive(Args, Debug)]
pub struct InfoArgs {
    /// Server address (host:port).
    #[arg(env = "RDASTREAM_ADDR")]
    pub addr: String,
    /// Handshake timeout (e.g. 10s, 500ms).
    #[arg(long, default_value = "10s", env = "RDASTREAM_TIMEOUT")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on (e.g. 127.0.0.1:51244; port 0 picks a free port).
    pub bind: String,
    /// Number of channels announced.
    #[arg(long, default_value = "8", value_parser = clap::value_parser!(u32).range(1..))]
    pub channels: u32,
    /// Sampling interval in microseconds.
    #[arg(long, default_value = "2000")]
    pub sampling_interval: f64,
    /// Resolution announced for every channel, in microvolts.
    #[arg(long, default_value = "0.1")]
    pub resolution: f64,
    /// Sample rows per Data frame.
    #[arg(long, default_value = "10", value_parser = clap::value_parser!(u32).range(1..))]
    pub points: u32,
    /// Pause between Data frames (e.g. 20ms).
    #[arg(long, default_value = "20ms")]
    pub block_interval: String,
    /// Send a Stop frame after this many Data frames. Default: stream until the client leaves.
    #[arg(long)]
    pub blocks: Option<u64>,
    /// Interleave an undocumented frame every N Data frames (0 disables).
    #[arg(long, default_value = "10")]
    pub undocumented_every: u64,
    /// Exit after the first client session.
    #[arg(long)]
    pub once: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse a human duration such as `250us`, `20ms`, `5s` or `2m`.
/// A bare number is taken as seconds.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("us") {
        (num, "us")
    } else if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else if let Some(num) = input.strip_suffix('m') {
        (num, "m")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .trim()
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(match unit {
        "us" => Duration::from_micros(value),
        "ms" => Duration::from_millis(value),
        "m" => Duration::from_secs(value * 60),
        _ => Duration::from_secs(value),
    })
}

/// Clear `running` on Ctrl+C.
pub fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("failed to install Ctrl+C handler: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("2").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("500us").unwrap(), Duration::from_micros(500));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
    }

    #[test]
    fn parse_duration_invalid() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("").is_err());
        assert!(parse_duration("fast").is_err());
        assert_eq!(parse_duration("-1s").unwrap_err().code, USAGE);
    }
}
