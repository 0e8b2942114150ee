use muxcall_rpc::{HttpDialer, ProxyConfig, ReconnectingClient, TcpDialer};
use tracing::info;

use crate::cmd::{parse_duration, runtime, WatchArgs};
use crate::exit::{CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_event, OutputFormat};

pub fn run(args: WatchArgs, format: OutputFormat) -> CliResult<i32> {
    let config = ProxyConfig::default()
        .with_codec(args.conn.codec)
        .with_heartbeat(
            parse_duration(&args.interval)?,
            parse_duration(&args.heartbeat_timeout)?,
        )
        .with_backoff(parse_duration(&args.backoff)?, args.max_backoff_units);
    runtime()?.block_on(watch(args, config, format))
}

async fn watch(args: WatchArgs, config: ProxyConfig, format: OutputFormat) -> CliResult<i32> {
    let (proxy, mut events) = if args.conn.http {
        ReconnectingClient::spawn(HttpDialer::new(args.conn.http_config()), &args.addr, config)
    } else {
        ReconnectingClient::spawn(TcpDialer, &args.addr, config)
    };

    let mut printed = 0usize;
    let outcome = loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                break signal.map_err(|err| {
                    CliError::new(INTERNAL, format!("signal handler setup failed: {err}"))
                });
            }
            event = events.recv() => {
                let Some(event) = event else { break Ok(()) };
                print_event(&event, format);
                printed = printed.saturating_add(1);
                if args.count.is_some_and(|count| printed >= count) {
                    break Ok(());
                }
            }
        }
    };

    proxy.close().await;
    info!(addr = %args.addr, events = printed, "watch finished");
    outcome.map(|()| SUCCESS)
}
