use std::time::Duration;

use clap::{Args, Subcommand};
use muxcall_frame::{CodecKind, DEFAULT_MAX_PAYLOAD};
use muxcall_rpc::{Client, ClientConfig, HttpConfig};
use muxcall_transport::DEFAULT_RPC_PATH;

use crate::exit::{io_error, rpc_error, CliError, CliResult, TIMEOUT, USAGE};
use crate::output::OutputFormat;

pub mod call;
pub mod serve;
pub mod version;
pub mod watch;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Host the demo Arith and Echo services.
    Serve(ServeArgs),
    /// Invoke one method and print its reply.
    Call(CallArgs),
    /// Keep a heartbeat-probed connection open and print state transitions.
    Watch(WatchArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Call(args) => call::run(args, format),
        Command::Watch(args) => watch::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Connection settings shared by every subcommand that touches the network.
#[derive(Args, Debug, Clone)]
pub struct ConnectArgs {
    /// Wire codec; both ends must agree.
    #[arg(long, default_value = "framed")]
    pub codec: CodecKind,
    /// Bootstrap connections with HTTP CONNECT.
    #[arg(long)]
    pub http: bool,
    /// Request path for the HTTP CONNECT bootstrap.
    #[arg(long, default_value = DEFAULT_RPC_PATH, requires = "http")]
    pub path: String,
}

impl ConnectArgs {
    pub fn http_config(&self) -> HttpConfig {
        HttpConfig::default().with_path(self.path.clone())
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::default().with_codec(self.codec)
    }

    pub fn transport_name(&self) -> &'static str {
        if self.http {
            "http"
        } else {
            "tcp"
        }
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on.
    #[arg(default_value = "127.0.0.1:7410")]
    pub addr: String,
    #[command(flatten)]
    pub conn: ConnectArgs,
    /// Largest accepted header or body, in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_PAYLOAD)]
    pub max_payload: usize,
}

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Server address.
    pub addr: String,
    /// Method to call, as Service.Method_.
    pub service_method: String,
    /// Argument as JSON.
    #[arg(long, default_value = "null")]
    pub json: String,
    #[command(flatten)]
    pub conn: ConnectArgs,
    /// Bound on connecting and on waiting for the reply (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Server address.
    pub addr: String,
    #[command(flatten)]
    pub conn: ConnectArgs,
    /// Time between heartbeats (e.g. 1s, 250ms).
    #[arg(long, default_value = "1s")]
    pub interval: String,
    /// How long a heartbeat may wait for its reply.
    #[arg(long, default_value = "500ms")]
    pub heartbeat_timeout: String,
    /// Backoff after the first failed dial; grows by this much per failure.
    #[arg(long, default_value = "1s")]
    pub backoff: String,
    /// Ceiling on the backoff, in multiples of --backoff.
    #[arg(long, default_value_t = 10)]
    pub max_backoff_units: u32,
    /// Exit after printing N state transitions.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn runtime() -> CliResult<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("runtime setup failed", &err))
}

/// Dial `addr` with the codec and transport `conn` selects, giving up after `timeout`.
pub async fn connect(addr: &str, conn: &ConnectArgs, timeout: Duration) -> CliResult<Client> {
    let dial = async {
        if conn.http {
            Client::dial_http(addr, conn.http_config(), conn.client_config()).await
        } else {
            Client::dial(addr, conn.client_config()).await
        }
    };
    match tokio::time::timeout(timeout, dial).await {
        Ok(Ok(client)) => Ok(client),
        Ok(Err(err)) => Err(rpc_error("connect failed", &err)),
        Err(_) => Err(CliError::new(
            TIMEOUT,
            format!("connect failed: timed out after {timeout:?}"),
        )),
    }
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(match unit {
        "ms" => Duration::from_millis(value),
        _ => Duration::from_secs(value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        for bad in ["0s", "bad", "", "5m"] {
            let err = parse_duration(bad).unwrap_err();
            assert_eq!(err.code, USAGE, "{bad:?}");
        }
    }

    #[test]
    fn http_config_carries_path() {
        let conn = ConnectArgs {
            codec: CodecKind::Stream,
            http: true,
            path: "/rpc".to_string(),
        };
        assert_eq!(conn.http_config().path, "/rpc");
        assert_eq!(conn.client_config().codec, CodecKind::Stream);
        assert_eq!(conn.transport_name(), "http");
    }
}
