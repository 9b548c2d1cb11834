#![cfg(all(unix, feature = "cli"))]

use std::io::{BufRead, BufReader};
use std::net::TcpListener;
use std::path::PathBuf;
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "rdacli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn rdastream() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_rdastream"));
    cmd.arg("--log-level").arg("error");
    cmd
}

/// Start `rdastream serve` on an ephemeral port and return the bound address.
fn spawn_server(extra: &[&str]) -> (Child, BufReader<ChildStdout>, String) {
    let mut child = rdastream()
        .args(["--format", "json", "serve", "127.0.0.1:0", "--once"])
        .args(extra)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("serve command should start");

    let mut stdout = BufReader::new(child.stdout.take().expect("stdout piped"));
    let mut line = String::new();
    stdout
        .read_line(&mut line)
        .expect("serve should announce its address");
    let announced: Value = serde_json::from_str(&line).expect("listening line is json");
    let addr = announced["listening"]
        .as_str()
        .expect("listening address")
        .to_string();
    (child, stdout, addr)
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> ExitStatus {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait().expect("child status") {
            return status;
        }
        if start.elapsed() >= timeout {
            let _ = child.kill();
            let _ = child.wait();
            panic!("child did not exit within {timeout:?}");
        }
        thread::sleep(Duration::from_millis(25));
    }
}

fn json_lines(raw: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(raw)
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).expect("every stdout line is json"))
        .collect()
}

#[test]
fn version_prints_package_version() {
    let output = rdastream()
        .arg("version")
        .output()
        .expect("version should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout.trim(),
        format!("rdastream {}", env!("CARGO_PKG_VERSION"))
    );
}

#[test]
fn extended_version_as_json() {
    let output = rdastream()
        .args(["--format", "json", "version", "--extended"])
        .output()
        .expect("version should run");

    assert!(output.status.success());
    let doc: Value =
        serde_json::from_slice(&output.stdout).expect("version output should be JSON");
    assert_eq!(doc["name"], "rdastream");
    assert_eq!(doc["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(
        doc["defaults"]["buffer_capacity"],
        rdastream_client::DEFAULT_BUFFER_CAPACITY
    );
}

#[test]
fn stream_against_mock_server_until_server_stop() {
    let dir = unique_temp_dir("stream");
    let timelog = dir.join("timelog.json");
    let (mut server, mut server_out, addr) = spawn_server(&[
        "--channels",
        "4",
        "--points",
        "10",
        "--blocks",
        "30",
        "--block-interval",
        "5ms",
        "--undocumented-every",
        "7",
    ]);

    let output = rdastream()
        .args(["--format", "json", "stream", &addr])
        .args(["--window", "50", "--duration", "20s", "--timeout", "5s"])
        .arg("--save-timelog")
        .arg("--timelog-path")
        .arg(&timelog)
        .output()
        .expect("stream should run");

    assert!(
        output.status.success(),
        "stream failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let lines = json_lines(&output.stdout);
    let summary = lines.last().expect("summary line");
    assert_eq!(summary["blocks"], 30);
    assert_eq!(summary["samples"], 300);
    assert_eq!(summary["high_water"], 300);
    assert_eq!(summary["exit"], "stopped");

    for window in &lines[..lines.len() - 1] {
        assert_eq!(window["rows"], 50);
        assert_eq!(window["channel_means"].as_array().map(Vec::len), Some(4));
    }

    let saved: Value =
        serde_json::from_str(&std::fs::read_to_string(&timelog).expect("time log written"))
            .expect("time log is json");
    assert_eq!(saved["format"], "rdastream-timelog/v1");
    assert_eq!(saved["timestamps"].as_array().map(Vec::len), Some(30));

    let status = wait_with_timeout(&mut server, Duration::from_secs(10));
    assert!(status.success());
    let mut line = String::new();
    server_out.read_line(&mut line).expect("session line");
    let session: Value = serde_json::from_str(&line).expect("session line is json");
    assert_eq!(session["outcome"], "completed");
    assert_eq!(session["blocks"], 30);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn info_reports_channel_table() {
    let (mut server, _server_out, addr) =
        spawn_server(&["--channels", "3", "--sampling-interval", "1000"]);

    let output = rdastream()
        .args(["--format", "json", "info", &addr, "--timeout", "5s"])
        .output()
        .expect("info should run");

    assert!(output.status.success());
    let lines = json_lines(&output.stdout);
    let info = &lines[0];
    assert_eq!(info["channel_count"], 3);
    assert_eq!(info["sampling_rate_hz"], 1000.0);
    assert_eq!(info["channels"][2]["name"], "Ch3");

    // The server notices the client leaving on its next write.
    let status = wait_with_timeout(&mut server, Duration::from_secs(10));
    assert!(status.success());
}

#[test]
fn silent_server_times_out_with_124() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("listener should bind");
    let addr = listener.local_addr().expect("local addr").to_string();

    let output = rdastream()
        .args(["stream", &addr, "--timeout", "200ms"])
        .output()
        .expect("stream should run");

    assert_eq!(output.status.code(), Some(124));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("handshake failed"));
    drop(listener);
}

#[test]
fn refused_connection_fails() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("listener should bind");
        listener.local_addr().expect("local addr").to_string()
    };

    let output = rdastream()
        .args(["info", &addr, "--timeout", "1s"])
        .output()
        .expect("info should run");

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("connect failed"));
}

#[test]
fn invalid_duration_is_a_usage_error() {
    let output = rdastream()
        .args(["stream", "127.0.0.1:9", "--timeout", "soon"])
        .output()
        .expect("stream should run");

    assert_eq!(output.status.code(), Some(64));
}
