use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use muxcall_frame::{
    encode_value, split, CodecKind, CodecReader, CodecWriter, FrameConfig, FrameError,
    RequestHeader,
};
use muxcall_transport::{Dial, HttpConfig, HttpDialer, RpcStream, TcpDialer};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Result, RpcError};
use crate::pending::{completer, Call, Outcome, Pending, PendingCall, PendingTable};

/// Default delay before the single retry of a blocked completion delivery.
pub const DEFAULT_DELIVERY_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Wire codec; must match the server's.
    pub codec: CodecKind,
    pub frame: FrameConfig,
    /// How long a full completion channel gets before its result is dropped.
    pub delivery_retry_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            codec: CodecKind::default(),
            frame: FrameConfig::default(),
            delivery_retry_delay: DEFAULT_DELIVERY_RETRY_DELAY,
        }
    }
}

impl ClientConfig {
    pub fn with_codec(mut self, codec: CodecKind) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_frame_config(mut self, frame: FrameConfig) -> Self {
        self.frame = frame;
        self
    }

    pub fn with_delivery_retry_delay(mut self, delay: Duration) -> Self {
        self.delivery_retry_delay = delay;
        self
    }
}

/// RPC client over one connection.
///
/// Any number of calls may be in flight at once; responses are matched to
/// calls by request ID, so they can arrive in any order. Cloning is cheap
/// and clones share the connection.
///
/// A background task reads responses until the connection fails or
/// [`close`](Self::close) is called. Constructors must run inside a Tokio
/// runtime.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

struct Inner {
    table: Mutex<PendingTable>,
    writer: tokio::sync::Mutex<CodecWriter>,
    close_signal: CancellationToken,
    config: ClientConfig,
    discarded: Arc<AtomicU64>,
}

impl Inner {
    fn table(&self) -> MutexGuard<'_, PendingTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Client {
    /// Start a client on an established connection with default settings.
    pub fn new<S: RpcStream>(stream: S) -> Self {
        Self::with_config(stream, ClientConfig::default())
    }

    pub fn with_config<S: RpcStream>(stream: S, config: ClientConfig) -> Self {
        let (reader, writer) = split(stream, config.codec, &config.frame);
        let inner = Arc::new(Inner {
            table: Mutex::new(PendingTable::default()),
            close_signal: writer.close_signal(),
            writer: tokio::sync::Mutex::new(writer),
            config,
            discarded: Arc::new(AtomicU64::new(0)),
        });
        tokio::spawn(read_responses(Arc::clone(&inner), reader));
        Self { inner }
    }

    /// Dial `addr` over raw TCP.
    pub async fn dial(addr: &str, config: ClientConfig) -> Result<Self> {
        let stream = TcpDialer.dial(addr).await?;
        Ok(Self::with_config(stream, config))
    }

    /// Dial `addr` and bootstrap the connection with HTTP `CONNECT`.
    pub async fn dial_http(addr: &str, http: HttpConfig, config: ClientConfig) -> Result<Self> {
        let stream = HttpDialer::new(http).dial(addr).await?;
        Ok(Self::with_config(stream, config))
    }

    /// Issue a call without waiting for it.
    ///
    /// The completed [`Call`] is delivered on `done`, or on a private
    /// channel reachable through the returned [`Pending`] if `done` is
    /// `None`. Delivery never blocks the connection: a full channel gets a
    /// single retry after the configured delay, then the result is dropped.
    pub async fn go<A, R>(
        &self,
        service_method: &str,
        arg: &A,
        done: Option<mpsc::Sender<Call<R>>>,
    ) -> Pending<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned + Send + 'static,
    {
        self.send(service_method.to_string(), encode_value(arg), done)
            .await
    }

    /// Call a method and wait for its reply.
    pub async fn call<A, R>(&self, service_method: &str, arg: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned + Send + 'static,
    {
        match self.go(service_method, arg, None).await.wait().await {
            Some(call) => call.into_result(),
            None => Err(RpcError::Shutdown),
        }
    }

    /// Call a method in the background and hand the outcome to `callback`.
    ///
    /// `callback` receives the error (if any), the reply (if any) and
    /// `extra`, unchanged.
    pub fn async_call<A, R, X, F>(
        &self,
        service_method: &str,
        arg: &A,
        callback: F,
        extra: X,
    ) -> JoinHandle<()>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned + Send + 'static,
        X: Send + 'static,
        F: FnOnce(Option<RpcError>, Option<R>, X) + Send + 'static,
    {
        let client = self.clone();
        let service_method = service_method.to_string();
        let body = encode_value(arg);
        tokio::spawn(async move {
            let pending = client.send::<R>(service_method, body, None).await;
            match pending.wait().await {
                Some(call) => callback(call.error, call.reply, extra),
                None => callback(Some(RpcError::Shutdown), None, extra),
            }
        })
    }

    /// Close the connection.
    ///
    /// Every call still pending completes with [`RpcError::Shutdown`].
    /// Closing twice returns [`RpcError::Shutdown`].
    pub async fn close(&self) -> Result<()> {
        {
            let mut table = self.inner.table();
            if table.closing {
                return Err(RpcError::Shutdown);
            }
            table.closing = true;
        }
        self.inner.close_signal.cancel();

        let mut writer = self.inner.writer.lock().await;
        if let Err(err) = writer.close().await {
            debug!(error = %err, "closing client codec");
        }
        Ok(())
    }

    /// Whether the connection has stopped delivering responses.
    pub fn is_shutdown(&self) -> bool {
        let table = self.inner.table();
        table.closing || table.shutdown
    }

    /// Number of calls waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.inner.table().len()
    }

    /// Results dropped because their completion channel stayed full.
    pub fn discarded_replies(&self) -> u64 {
        self.inner.discarded.load(Ordering::Relaxed)
    }

    pub fn codec(&self) -> CodecKind {
        self.inner.config.codec
    }

    async fn send<R>(
        &self,
        service_method: String,
        body: std::result::Result<Bytes, FrameError>,
        done: Option<mpsc::Sender<Call<R>>>,
    ) -> Pending<R>
    where
        R: DeserializeOwned + Send + 'static,
    {
        let (done, receiver) = match done {
            Some(done) => (done, None),
            None => {
                let (done, receiver) = mpsc::channel(1);
                (done, Some(receiver))
            }
        };
        let mut pending = Pending::new(service_method.clone(), receiver);
        let complete = completer(
            service_method.clone(),
            done,
            self.inner.config.delivery_retry_delay,
            Arc::clone(&self.inner.discarded),
        );

        let (mut header, body) = match (parse_service_method(&service_method), body) {
            (Ok((service, method)), Ok(body)) => (RequestHeader::new(service, method, 0), body),
            (Err(err), _) => {
                complete(None, Outcome::Failed(err));
                return pending;
            }
            (_, Err(err)) => {
                complete(None, Outcome::Failed(err.into()));
                return pending;
            }
        };

        // Held across ID allocation and the write so IDs reach the wire in order.
        let mut writer = self.inner.writer.lock().await;
        let inserted = self
            .inner
            .table()
            .insert(PendingCall::new(service_method, complete));
        let request_id = match inserted {
            Ok(request_id) => request_id,
            Err(call) => {
                drop(writer);
                call.abandon(RpcError::Shutdown);
                return pending;
            }
        };
        header.request_id = request_id;
        pending.set_request_id(request_id);

        let written = writer.write_request(&header, &body).await;
        drop(writer);
        if let Err(err) = written {
            // The response loop may already have failed the call.
            let call = self.inner.table().remove(request_id);
            if let Some(call) = call {
                debug!(
                    request_id,
                    service_method = %call.service_method,
                    error = %err,
                    "request write failed"
                );
                call.complete(request_id, Outcome::Failed(err.into()));
            }
        }
        pending
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("codec", &self.inner.config.codec)
            .field("pending_calls", &self.pending_calls())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

/// Split `Service.Method` into its two components.
pub fn parse_service_method(service_method: &str) -> Result<(&str, &str)> {
    let mut parts = service_method.split('.');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(service), Some(method), None) if !service.is_empty() && !method.is_empty() => {
            Ok((service, method))
        }
        _ => Err(RpcError::InvalidServiceMethod(service_method.to_string())),
    }
}

/// Demultiplex responses onto pending calls until the connection fails.
async fn read_responses(inner: Arc<Inner>, mut reader: CodecReader) {
    let (err, orphan) = loop {
        let header = match reader.read_response_header().await {
            Ok(header) => header,
            Err(err) => break (err, None),
        };
        let request_id = header.request_id;
        let call = inner.table().remove(request_id);

        // The body is always consumed to keep the stream aligned.
        let body = match reader.read_body().await {
            Ok(body) => body,
            Err(err) => break (err, call.map(|call| (request_id, call))),
        };

        let Some(call) = call else {
            warn!(
                request_id,
                service = %header.service,
                method = %header.method,
                "response for unknown request, discarding body"
            );
            continue;
        };

        let outcome = if !header.failure.is_empty() {
            Outcome::Failed(RpcError::Failure(header.failure))
        } else if !header.error.is_empty() {
            Outcome::Failed(RpcError::Application(header.error))
        } else {
            Outcome::Reply(body)
        };
        call.complete(request_id, outcome);
    };

    let (terminal, drained) = {
        let mut table = inner.table();
        let terminal = if table.closing {
            RpcError::Shutdown
        } else if err.is_eof() {
            RpcError::UnexpectedEof
        } else {
            RpcError::from(err)
        };
        let mut drained = table.drain();
        drained.extend(orphan);
        (terminal, drained)
    };

    if !drained.is_empty() || !matches!(terminal, RpcError::Shutdown) {
        debug!(pending = drained.len(), error = %terminal, "client connection terminated");
    }

    // Aborts a write blocked on the lock holder, then shuts the stream once.
    inner.close_signal.cancel();
    let closed = inner.writer.lock().await.close().await;
    if let Err(err) = closed {
        debug!(error = %err, "closing client codec");
    }
    for (request_id, call) in drained {
        call.complete(request_id, Outcome::Failed(terminal.clone()));
    }
}
