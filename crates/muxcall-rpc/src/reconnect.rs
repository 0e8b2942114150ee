//! Reconnecting client with a heartbeat-driven state machine.
//!
//! ```text
//! TryDial ──fail──▶ DialFailed ──backoff──▶ TryDial
//!    │
//!    └──ok──▶ DialSucceeded ──▶ Connected ──heartbeat fails──▶ LoseConnection ──▶ TryDial
//! ```
//!
//! Cancellation moves the machine to `Closed` from any state. Every
//! transition except `Connected` and `Closed` is published as a
//! [`StateEvent`]; once cancelled, nothing more is published and the event
//! channel closes.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use muxcall_frame::{CodecKind, FrameConfig};
use muxcall_transport::Dial;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::client::{Client, ClientConfig};
use crate::error::{Result, RpcError};
use crate::heartbeat;

/// States of the reconnect machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    TryDial,
    DialFailed,
    DialSucceeded,
    /// Heartbeats are flowing. Not published.
    Connected,
    LoseConnection,
    /// Cancelled. Not published.
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::TryDial => "try_dial",
            ConnectionState::DialFailed => "dial_failed",
            ConnectionState::DialSucceeded => "dial_succeeded",
            ConnectionState::Connected => "connected",
            ConnectionState::LoseConnection => "lose_connection",
            ConnectionState::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A published state transition.
#[derive(Debug, Clone)]
pub struct StateEvent {
    pub state: ConnectionState,
    pub remote_addr: String,
    /// The connection the transition concerns, when there is one.
    pub client: Option<Client>,
    pub error: Option<RpcError>,
}

/// Reconnect and heartbeat settings.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub codec: CodecKind,
    pub frame: FrameConfig,
    /// Time between heartbeats while connected.
    pub heartbeat_interval: Duration,
    /// How long a heartbeat may wait for its reply.
    pub heartbeat_timeout: Duration,
    /// Backoff after the first consecutive dial failure; grows by one unit
    /// per further failure.
    pub backoff_unit: Duration,
    /// Ceiling on the backoff, in units.
    pub max_backoff_units: u32,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            codec: CodecKind::default(),
            frame: FrameConfig::default(),
            heartbeat_interval: Duration::from_secs(1),
            heartbeat_timeout: Duration::from_millis(500),
            backoff_unit: Duration::from_secs(1),
            max_backoff_units: 10,
        }
    }
}

impl ProxyConfig {
    pub fn with_codec(mut self, codec: CodecKind) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_heartbeat(mut self, interval: Duration, timeout: Duration) -> Self {
        self.heartbeat_interval = interval;
        self.heartbeat_timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, unit: Duration, max_units: u32) -> Self {
        self.backoff_unit = unit;
        self.max_backoff_units = max_units;
        self
    }

    /// Delay after `failures` consecutive dial failures.
    pub fn backoff(&self, failures: u32) -> Duration {
        let units = failures.clamp(1, self.max_backoff_units.max(1));
        self.backoff_unit.saturating_mul(units)
    }

    fn client_config(&self) -> ClientConfig {
        ClientConfig::default()
            .with_codec(self.codec)
            .with_frame_config(self.frame.clone())
    }
}

struct Shared {
    state: Mutex<ConnectionState>,
    client: Mutex<Option<Client>>,
    cancel: CancellationToken,
    remote_addr: String,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn client(&self) -> MutexGuard<'_, Option<Client>> {
        self.client.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `state` and publish it. Returns `false` once cancelled.
    fn publish(
        &self,
        events: &mpsc::UnboundedSender<StateEvent>,
        state: ConnectionState,
        client: Option<Client>,
        error: Option<RpcError>,
    ) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        *self.state() = state;
        match &error {
            Some(err) => debug!(addr = %self.remote_addr, %state, error = %err, "connection state"),
            None => debug!(addr = %self.remote_addr, %state, "connection state"),
        }
        // Observers are optional; a dropped receiver is not an error.
        let _ = events.send(StateEvent {
            state,
            remote_addr: self.remote_addr.clone(),
            client,
            error,
        });
        true
    }
}

/// A client that keeps itself connected.
///
/// Dials in the background, probes the connection with heartbeats, and
/// redials whenever a heartbeat fails.
pub struct ReconnectingClient {
    shared: Arc<Shared>,
    task: Option<JoinHandle<()>>,
}

impl ReconnectingClient {
    /// Start connecting to `addr` through `dialer`.
    ///
    /// Returns the client and the receiving end of its state events.
    pub fn spawn<D: Dial>(
        dialer: D,
        addr: impl Into<String>,
        config: ProxyConfig,
    ) -> (Self, mpsc::UnboundedReceiver<StateEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            state: Mutex::new(ConnectionState::TryDial),
            client: Mutex::new(None),
            cancel: CancellationToken::new(),
            remote_addr: addr.into(),
        });
        let task = tokio::spawn(run(dialer, config, Arc::clone(&shared), events));
        let client = Self {
            shared,
            task: Some(task),
        };
        (client, receiver)
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state()
    }

    pub fn remote_addr(&self) -> &str {
        &self.shared.remote_addr
    }

    /// The live connection, if currently connected.
    pub fn client(&self) -> Option<Client> {
        self.shared.client().clone()
    }

    /// Call through the current connection.
    ///
    /// Fails with [`RpcError::Shutdown`] while disconnected.
    pub async fn call<A, R>(&self, service_method: &str, arg: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned + Send + 'static,
    {
        match self.client() {
            Some(client) => client.call(service_method, arg).await,
            None => Err(RpcError::Shutdown),
        }
    }

    /// Signal the machine to stop without waiting for it.
    pub fn cancel(&self) {
        self.shared.cancel.cancel();
    }

    /// Stop the machine and wait until it has closed its connection.
    pub async fn close(mut self) {
        self.shared.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                debug!(error = %err, "reconnect task ended abnormally");
            }
        }
    }
}

impl Drop for ReconnectingClient {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

async fn run<D: Dial>(
    dialer: D,
    config: ProxyConfig,
    shared: Arc<Shared>,
    events: mpsc::UnboundedSender<StateEvent>,
) {
    let cancel = shared.cancel.clone();
    let addr = shared.remote_addr.clone();
    let mut failures: u32 = 0;

    loop {
        if !shared.publish(&events, ConnectionState::TryDial, None, None) {
            break;
        }
        let dialed = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            dialed = dialer.dial(&addr) => dialed,
        };

        let stream = match dialed {
            Ok(stream) => stream,
            Err(err) => {
                failures = failures.saturating_add(1);
                let delay = config.backoff(failures);
                if !shared.publish(&events, ConnectionState::DialFailed, None, Some(err.into())) {
                    break;
                }
                debug!(%addr, failures, ?delay, "backing off");
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => continue,
                }
            }
        };

        failures = 0;
        let client = Client::with_config(stream, config.client_config());
        *shared.client() = Some(client.clone());
        if !shared.publish(&events, ConnectionState::DialSucceeded, Some(client.clone()), None) {
            shared.client().take();
            let _ = client.close().await;
            break;
        }
        *shared.state() = ConnectionState::Connected;
        info!(%addr, "connected");

        let lost = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            err = keep_alive(&client, &config) => Some(err),
        };
        shared.client().take();
        let _ = client.close().await;

        match lost {
            Some(err) => {
                info!(%addr, error = %err, "connection lost");
                if !shared.publish(&events, ConnectionState::LoseConnection, Some(client), Some(err)) {
                    break;
                }
            }
            None => break,
        }
    }

    *shared.state() = ConnectionState::Closed;
    shared.client().take();
    info!(%addr, "reconnecting client closed");
}

/// Probe the connection until a heartbeat fails, and return the failure.
async fn keep_alive(client: &Client, config: &ProxyConfig) -> RpcError {
    let mut ticker = tokio::time::interval(config.heartbeat_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if let Err(err) = heartbeat::probe(client, config.heartbeat_timeout).await {
            return err;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_linearly_to_ceiling() {
        let config = ProxyConfig::default().with_backoff(Duration::from_millis(10), 3);
        assert_eq!(config.backoff(1), Duration::from_millis(10));
        assert_eq!(config.backoff(2), Duration::from_millis(20));
        assert_eq!(config.backoff(3), Duration::from_millis(30));
        assert_eq!(config.backoff(50), Duration::from_millis(30));
    }

    #[test]
    fn backoff_never_drops_below_one_unit() {
        let config = ProxyConfig::default().with_backoff(Duration::from_millis(10), 0);
        assert_eq!(config.backoff(0), Duration::from_millis(10));
        assert_eq!(config.backoff(7), Duration::from_millis(10));
    }

    #[test]
    fn state_names_are_snake_case() {
        assert_eq!(ConnectionState::LoseConnection.to_string(), "lose_connection");
        assert_eq!(ConnectionState::TryDial.as_str(), "try_dial");
    }
}
