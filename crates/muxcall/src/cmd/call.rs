use std::time::{Duration, Instant};

use muxcall_rpc::{parse_service_method, RpcError};
use serde_json::Value;
use tracing::debug;

use crate::cmd::{connect, parse_duration, runtime, CallArgs};
use crate::exit::{rpc_error, CliError, CliResult, SUCCESS, TIMEOUT, USAGE};
use crate::output::{print_reply, OutputFormat, ReplyOutput};

pub fn run(args: CallArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let arg = parse_argument(&args.json)?;
    parse_service_method(&args.service_method)
        .map_err(|err| rpc_error("invalid method", &err))?;

    runtime()?.block_on(call(args, arg, timeout, format))
}

async fn call(args: CallArgs, arg: Value, timeout: Duration, format: OutputFormat) -> CliResult<i32> {
    let client = connect(&args.addr, &args.conn, timeout).await?;
    let started = Instant::now();
    let pending = client.go::<_, Value>(&args.service_method, &arg, None).await;
    let request_id = pending.request_id();
    let waited = tokio::time::timeout(timeout, pending.wait()).await;
    if let Err(err) = client.close().await {
        debug!(error = %err, "closing client");
    }

    let call = waited.map_err(|_| {
        CliError::new(
            TIMEOUT,
            format!("call failed: no reply within {timeout:?}"),
        )
    })?;
    let reply = call
        .map_or(Err(RpcError::Shutdown), |call| call.into_result())
        .map_err(|err| rpc_error("call failed", &err))?;

    print_reply(
        &ReplyOutput {
            service_method: &args.service_method,
            request_id,
            elapsed_ms: (started.elapsed().as_secs_f64() * 1000.0 * 100.0).round() / 100.0,
            reply: &reply,
        },
        format,
    );
    Ok(SUCCESS)
}

fn parse_argument(json: &str) -> CliResult<Value> {
    serde_json::from_str(json)
        .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argument_must_be_json() {
        assert_eq!(parse_argument("{\"a\":1}").unwrap()["a"], 1);
        assert_eq!(parse_argument("null").unwrap(), Value::Null);
        assert_eq!(parse_argument("{a:1}").unwrap_err().code, USAGE);
    }
}
