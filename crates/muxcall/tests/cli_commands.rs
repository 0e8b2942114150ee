#![cfg(feature = "cli")]

use std::io::{BufRead, BufReader};
use std::net::TcpListener;
use std::process::{Child, Command, Output, Stdio};

/// A `muxcall serve` child process, killed on drop.
struct ServeProcess {
    child: Child,
    addr: String,
}

impl ServeProcess {
    fn start(extra: &[&str]) -> Self {
        let mut child = Command::new(env!("CARGO_BIN_EXE_muxcall"))
            .args(["--log-level", "error", "--format", "json", "serve", "127.0.0.1:0"])
            .args(extra)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("serve should start");

        let stdout = child.stdout.take().expect("stdout should be piped");
        let mut line = String::new();
        BufReader::new(stdout)
            .read_line(&mut line)
            .expect("serve should announce its address");
        let announced: serde_json::Value =
            serde_json::from_str(&line).expect("announcement should be JSON");
        assert_eq!(announced["event"], "listening");
        let addr = announced["addr"]
            .as_str()
            .expect("announcement should carry addr")
            .to_string();
        Self { child, addr }
    }
}

impl Drop for ServeProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn muxcall(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_muxcall"))
        .args(["--log-level", "error", "--format", "json"])
        .args(args)
        .output()
        .expect("muxcall should run")
}

fn reply_of(output: &Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let parsed: serde_json::Value =
        serde_json::from_str(stdout.trim()).expect("reply should be JSON");
    parsed["reply"].clone()
}

/// An address nothing listens on.
fn closed_port() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind should succeed");
    let addr = listener.local_addr().expect("local addr").to_string();
    drop(listener);
    addr
}

#[test]
fn call_against_served_arith() {
    let server = ServeProcess::start(&[]);
    let output = muxcall(&["call", &server.addr, "Arith.Add_", "--json", r#"{"a":40,"b":2}"#]);
    assert!(output.status.success(), "{output:?}");
    assert_eq!(reply_of(&output), 42);
}

#[test]
fn echo_over_http_with_stream_codec() {
    let server = ServeProcess::start(&["--http", "--codec", "stream"]);
    let argument = r#"{"list":[1,"two",null],"ok":true}"#;
    let output = muxcall(&[
        "call",
        &server.addr,
        "Echo.Echo_",
        "--json",
        argument,
        "--http",
        "--codec",
        "stream",
    ]);
    assert!(output.status.success(), "{output:?}");
    let expected: serde_json::Value = serde_json::from_str(argument).unwrap();
    assert_eq!(reply_of(&output), expected);
}

#[test]
fn application_error_exits_1() {
    let server = ServeProcess::start(&[]);
    let output = muxcall(&["call", &server.addr, "Arith.Div_", "--json", r#"{"a":1,"b":0}"#]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("divide by zero"));
}

#[test]
fn unknown_method_exits_60() {
    let server = ServeProcess::start(&[]);
    let output = muxcall(&["call", &server.addr, "Arith.Pow_", "--json", r#"{"a":1,"b":0}"#]);
    assert_eq!(output.status.code(), Some(60));
    assert!(String::from_utf8_lossy(&output.stderr).contains("rpc: can't find method Arith.Pow_"));
}

#[test]
fn malformed_arguments_exit_64() {
    let output = muxcall(&["call", "127.0.0.1:1", "Arith", "--json", "null"]);
    assert_eq!(output.status.code(), Some(64));

    let output = muxcall(&["call", "127.0.0.1:1", "Arith.Add_", "--json", "{a:1}"]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn refused_connection_exits_3() {
    let output = muxcall(&["call", &closed_port(), "Arith.Add_", "--timeout", "2s"]);
    assert_eq!(output.status.code(), Some(3));
    assert!(String::from_utf8_lossy(&output.stderr).contains("connect failed"));
}

#[test]
fn watch_reports_dial_then_success() {
    let server = ServeProcess::start(&[]);
    let output = muxcall(&["watch", &server.addr, "--count", "2", "--interval", "100ms"]);
    assert!(output.status.success(), "{output:?}");

    let states: Vec<String> = String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| {
            let event: serde_json::Value = serde_json::from_str(line).expect("event should be JSON");
            event["state"].as_str().unwrap_or_default().to_string()
        })
        .collect();
    assert_eq!(states, vec!["try_dial", "dial_succeeded"]);
}

#[test]
fn watch_reports_failed_dials() {
    let output = muxcall(&["watch", &closed_port(), "--count", "4", "--backoff", "50ms"]);
    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let states: Vec<&str> = stdout
        .lines()
        .filter_map(|line| line.split("\"state\":\"").nth(1))
        .filter_map(|rest| rest.split('"').next())
        .collect();
    assert_eq!(states, vec!["try_dial", "dial_failed", "try_dial", "dial_failed"]);
}

#[test]
fn version_prints_package_version() {
    let output = muxcall(&["version"]);
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        format!("muxcall {}", env!("CARGO_PKG_VERSION"))
    );
}
