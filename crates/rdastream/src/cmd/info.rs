use rdastream_client::{ClientConfig, RdaClient};
use rdastream_frame::StartMessage;
use serde::Serialize;

use crate::cmd::{parse_duration, InfoArgs};
use crate::exit::{client_error, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{new_table, print_json, OutputFormat};

#[derive(Serialize)]
struct ChannelInfo {
    index: usize,
    name: String,
    resolution_uv: f64,
}

#[derive(Serialize)]
struct InfoOutput {
    server: String,
    channel_count: usize,
    sampling_interval_us: f64,
    sampling_rate_hz: Option<f64>,
    channels: Vec<ChannelInfo>,
}

impl InfoOutput {
    fn from_start(server: &str, start: &StartMessage) -> Self {
        let channels = start
            .resolutions
            .iter()
            .enumerate()
            .map(|(index, resolution)| ChannelInfo {
                index,
                name: start
                    .channel_name(index)
                    .map_or_else(|| format!("ch{index}"), str::to_string),
                resolution_uv: *resolution,
            })
            .collect();
        Self {
            server: server.to_string(),
            channel_count: start.channels(),
            sampling_interval_us: start.sampling_interval,
            sampling_rate_hz: start.sampling_rate_hz(),
            channels,
        }
    }
}

pub fn run(args: InfoArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let mut client = RdaClient::with_config(ClientConfig {
        handshake_timeout: timeout,
        ..ClientConfig::default()
    });

    client
        .connect(args.addr.as_str())
        .map_err(|err| client_error("connect failed", err))?;
    client
        .start_streaming(timeout)
        .map_err(|err| client_error("handshake failed", err))?;

    let start = client.start_message().cloned();
    client
        .stop_streaming(false)
        .map_err(|err| client_error("stop failed", err))?;
    client
        .disconnect()
        .map_err(|err| client_error("disconnect failed", err))?;

    // A resumed session carries no fresh metadata; a new client never resumes.
    let start = start.ok_or_else(|| CliError::new(DATA_INVALID, "server sent no start message"))?;
    print_info(&InfoOutput::from_start(&args.addr, &start), format);
    Ok(SUCCESS)
}

fn print_info(out: &InfoOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => {
            println!("Server:        {}", out.server);
            println!("Sampling rate: {}", rate_label(out));
            let mut table = new_table(vec!["#", "CHANNEL", "RESOLUTION (uV)"]);
            for ch in &out.channels {
                table.add_row(vec![
                    ch.index.to_string(),
                    ch.name.clone(),
                    ch.resolution_uv.to_string(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("Session Info:");
            println!("  Server:        {}", out.server);
            println!("  Channels:      {}", out.channel_count);
            println!("  Sampling rate: {}", rate_label(out));
            for ch in &out.channels {
                println!("    {:>3} {:<12} {} uV", ch.index, ch.name, ch.resolution_uv);
            }
        }
    }
}

fn rate_label(out: &InfoOutput) -> String {
    match out.sampling_rate_hz {
        Some(hz) => format!("{hz:.2} Hz ({} us)", out.sampling_interval_us),
        None => format!("unknown ({} us)", out.sampling_interval_us),
    }
}
