#![cfg(feature = "cli")]

use std::io::{BufRead, BufReader};
use std::net::TcpListener;
use std::process::{Child, Command, Stdio};

struct Server {
    child: Child,
    addr: String,
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn serve(extra: &[&str]) -> Server {
    let mut child = Command::new(env!("CARGO_BIN_EXE_nulrpc"))
        .args(["--log-level", "error", "--format", "raw", "serve", "127.0.0.1:0"])
        .args(extra)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("serve command should start");

    let stdout = child.stdout.take().expect("stdout should be piped");
    let mut line = String::new();
    BufReader::new(stdout)
        .read_line(&mut line)
        .expect("serve should print its address");
    Server {
        child,
        addr: line.trim().to_string(),
    }
}

fn nulrpc(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_nulrpc"))
        .args(["--log-level", "error", "--format", "json"])
        .args(args)
        .output()
        .expect("nulrpc should run")
}

fn json_lines(output: &std::process::Output) -> Vec<serde_json::Value> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| serde_json::from_str(line).expect("stdout should be JSON lines"))
        .collect()
}

#[test]
fn request_ping_prints_pong() {
    let server = serve(&[]);
    let output = nulrpc(&["request", &server.addr, "ping", "--id", "abc"]);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let lines = json_lines(&output);
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["id"], "abc");
    assert_eq!(lines[0]["_type"], "response");
    assert_eq!(lines[0]["status"], "okay");
    assert_eq!(lines[0]["value"], "pong");
}

#[test]
fn request_echoes_args() {
    let server = serve(&[]);
    let output = nulrpc(&["request", &server.addr, "sum", "--args", "[1,2,3]"]);

    assert!(output.status.success());
    let lines = json_lines(&output);
    assert_eq!(lines[0]["value"]["endpoint"], "sum");
    assert_eq!(lines[0]["value"]["args"], serde_json::json!([1, 2, 3]));
}

#[test]
fn unanswered_request_times_out_with_124() {
    let server = serve(&[]);
    let output = nulrpc(&["request", &server.addr, "silent", "--timeout", "200ms"]);

    assert_eq!(output.status.code(), Some(124));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("timed out"), "stderr: {stderr}");
}

#[test]
fn refused_connect_exits_with_failure() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let addr = format!("127.0.0.1:{port}");
    let output = nulrpc(&["request", &addr, "ping", "--connect-timeout", "1s"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("connect failed"));
}

#[test]
fn bad_address_is_usage_error() {
    let output = nulrpc(&["request", "nowhere", "ping"]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn watch_prints_pushed_events() {
    let server = serve(&["--events", "50ms"]);
    let output = nulrpc(&["watch", &server.addr, "--count", "2"]);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let lines = json_lines(&output);
    assert_eq!(lines.len(), 2);
    for line in &lines {
        assert_eq!(line["_type"], "event");
        assert_eq!(line["id"], "tick");
    }
    assert!(lines[1]["value"]["seq"].as_u64() > lines[0]["value"]["seq"].as_u64());
}

#[test]
fn watch_survives_heartbeats() {
    let server = serve(&["--heartbeat", "30ms", "--events", "200ms"]);
    let output = nulrpc(&[
        "watch",
        &server.addr,
        "--count",
        "1",
        "--heartbeat-check",
        "--heartbeat-interval",
        "100ms",
    ]);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(json_lines(&output).len(), 1);
}

#[test]
fn version_prints_package_version() {
    let output = nulrpc(&["version"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("nulrpc {}", env!("CARGO_PKG_VERSION")));
}
