use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rdastream_client::{ClientConfig, RdaClient, SessionState, WorkerExit, WorkerSummary};
use rdastream_frame::CodecConfig;
use serde::Serialize;

use crate::cmd::{install_ctrlc_handler, parse_duration, StreamArgs};
use crate::exit::{client_error, CliError, CliResult, FAILURE, INTERNAL, SUCCESS};
use crate::output::{format_means, new_table, print_json, OutputFormat};

/// How long a single poll waits for new samples before the loop re-checks
/// Ctrl+C, the duration limit and the worker.
const POLL_SLICE: Duration = Duration::from_millis(250);

#[derive(Serialize)]
struct WindowOutput {
    window: u64,
    high_water: u64,
    first_index: u64,
    rows: usize,
    channel_means: Vec<f64>,
}

#[derive(Serialize)]
struct SummaryOutput {
    blocks: u64,
    samples: u64,
    windows: u64,
    high_water: u64,
    exit: String,
    elapsed_ms: u64,
    timelog_path: Option<String>,
}

pub fn run(args: StreamArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let poll_interval = parse_duration(&args.poll_interval)?;
    let limit = args.duration.as_deref().map(parse_duration).transpose()?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut client = RdaClient::with_config(ClientConfig {
        buffer_capacity: args.buffer_size,
        pocket_size: args.pocket,
        handshake_timeout: timeout,
        poll_interval,
        timelog_path: args.timelog_path.clone(),
        codec: CodecConfig {
            max_frame_size: args.max_frame_size,
        },
        ..ClientConfig::default()
    });

    client
        .connect(args.addr.as_str())
        .map_err(|err| client_error("connect failed", err))?;
    client
        .start_streaming(timeout)
        .map_err(|err| client_error("handshake failed", err))?;
    if let Some(start) = client.start_message() {
        tracing::info!(
            channels = start.channels(),
            sampling_rate_hz = start.sampling_rate_hz().unwrap_or(0.0),
            "session started"
        );
    }

    let started = Instant::now();
    let mut windows = 0u64;
    while running.load(Ordering::SeqCst) {
        if limit.is_some_and(|limit| started.elapsed() >= limit) {
            tracing::info!("duration limit reached");
            break;
        }
        if !client.is_streaming() {
            tracing::info!("streaming worker finished");
            break;
        }

        let window = client
            .poll(args.window, POLL_SLICE, poll_interval)
            .map_err(|err| client_error("poll failed", err))?
            .map(|samples| WindowOutput {
                window: windows,
                high_water: samples.end_index(),
                first_index: samples.first_index(),
                rows: samples.rows(),
                channel_means: samples.channel_means(),
            });
        if let Some(window) = window {
            print_window(&window, format);
            windows += 1;
        }
    }

    let high_water = client.last_sample_index();
    let summary = if client.state() == SessionState::Streaming {
        Some(
            client
                .stop_streaming(args.save_timelog)
                .map_err(|err| client_error("stop failed", err))?,
        )
    } else {
        None
    };
    client
        .disconnect()
        .map_err(|err| client_error("disconnect failed", err))?;

    let Some(summary) = summary else {
        return Err(CliError::new(INTERNAL, "session ended without a summary"));
    };
    let out = SummaryOutput {
        blocks: summary.blocks,
        samples: summary.samples,
        windows,
        high_water,
        exit: exit_label(&summary),
        elapsed_ms: started.elapsed().as_millis() as u64,
        timelog_path: args
            .save_timelog
            .then(|| args.timelog_path.display().to_string()),
    };
    print_summary(&out, format);

    match summary.exit {
        WorkerExit::Failed(reason) => Err(CliError::new(
            FAILURE,
            format!("streaming failed: {reason}"),
        )),
        _ => Ok(SUCCESS),
    }
}

fn exit_label(summary: &WorkerSummary) -> String {
    match &summary.exit {
        WorkerExit::StopCommand => "stopped".to_string(),
        WorkerExit::ControlDisconnected => "control-disconnected".to_string(),
        WorkerExit::Failed(reason) => format!("failed: {reason}"),
    }
}

fn print_window(window: &WindowOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(window),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!(
                "window={} high_water={} rows={} means=[{}]",
                window.window,
                window.high_water,
                window.rows,
                format_means(&window.channel_means)
            );
        }
    }
}

fn print_summary(out: &SummaryOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => {
            let mut table = new_table(vec!["BLOCKS", "SAMPLES", "WINDOWS", "HIGH WATER", "EXIT"]);
            table.add_row(vec![
                out.blocks.to_string(),
                out.samples.to_string(),
                out.windows.to_string(),
                out.high_water.to_string(),
                out.exit.clone(),
            ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("Session Summary:");
            println!("  Blocks:     {}", out.blocks);
            println!("  Samples:    {}", out.samples);
            println!("  Windows:    {}", out.windows);
            println!("  High water: {}", out.high_water);
            println!("  Exit:       {}", out.exit);
            println!("  Elapsed:    {}ms", out.elapsed_ms);
            if let Some(path) = &out.timelog_path {
                println!("  Time log:   {path}");
            }
        }
    }
}
