use std::time::Duration;

use crate::client::Client;
use crate::error::{Result, RpcError};
use crate::registry::{MethodSet, Service};

/// Name the heartbeat service is registered under.
pub const HEARTBEAT_SERVICE: &str = "Heartbeat";
/// Full call name of the heartbeat probe.
pub const HEARTBEAT_METHOD: &str = "Heartbeat.Ping_";
/// Heartbeat request payload.
pub const PING: &str = "ping";
/// Heartbeat reply payload.
pub const PONG: &str = "pong";

/// Liveness service pre-registered on every server.
#[derive(Debug, Clone, Copy, Default)]
pub struct Heartbeat;

impl Heartbeat {
    fn ping(&self, payload: String, reply: &mut String) -> std::result::Result<(), String> {
        if payload != PING {
            return Err(format!("unexpected heartbeat payload {payload:?}"));
        }
        reply.push_str(PONG);
        Ok(())
    }
}

impl Service for Heartbeat {
    fn methods(methods: &mut MethodSet<Self>) {
        methods.add("Ping_", Heartbeat::ping);
    }
}

/// Send one heartbeat and wait at most `timeout` for the reply.
pub async fn probe(client: &Client, timeout: Duration) -> Result<()> {
    let reply = tokio::time::timeout(timeout, client.call::<_, String>(HEARTBEAT_METHOD, PING))
        .await
        .map_err(|_| RpcError::HeartbeatTimeout(timeout))??;
    if reply != PONG {
        return Err(RpcError::Heartbeat(format!("unexpected reply {reply:?}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use muxcall_frame::{decode_value, encode_value};
    use tokio::io::duplex;

    use super::*;
    use crate::registry::ServiceDescriptor;

    #[test]
    fn ping_answers_pong() {
        let service = ServiceDescriptor::new(Heartbeat, None).unwrap();
        assert_eq!(service.name(), HEARTBEAT_SERVICE);
        let arg = service
            .decode_arg("Ping_", &encode_value(PING).unwrap())
            .unwrap();
        let reply = service.call("Ping_", arg).unwrap();
        assert_eq!(decode_value::<String>(&reply).unwrap(), PONG);
    }

    #[test]
    fn other_payloads_are_application_errors() {
        let service = ServiceDescriptor::new(Heartbeat, None).unwrap();
        let arg = service
            .decode_arg("Ping_", &encode_value("hello").unwrap())
            .unwrap();
        assert!(matches!(
            service.call("Ping_", arg),
            Err(RpcError::Application(_))
        ));
    }

    #[tokio::test]
    async fn silent_peer_times_out() {
        let (local, _silent) = duplex(64 * 1024);
        let client = Client::new(local);
        let err = probe(&client, Duration::from_millis(30)).await.unwrap_err();
        assert!(matches!(err, RpcError::HeartbeatTimeout(_)));
        client.close().await.unwrap();
    }
}
