use std::sync::Arc;

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use muxcall_frame::{split, CodecKind, CodecWriter, FrameConfig, RequestHeader, ResponseHeader, NIL};
use muxcall_transport::{handshake_server, HttpConfig, RpcStream, TcpTransport};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::error::{Result, RpcError};
use crate::heartbeat::Heartbeat;
use crate::registry::{DecodedArg, Service, ServiceDescriptor, ServiceInfo};

/// Body sent with failure and error responses.
const INVALID_REQUEST: &[u8] = &[NIL];

/// Server configuration.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    pub frame: FrameConfig,
    /// Settings for the HTTP `CONNECT` front-end.
    pub http: HttpConfig,
}

impl ServerConfig {
    pub fn with_frame_config(mut self, frame: FrameConfig) -> Self {
        self.frame = frame;
        self
    }

    pub fn with_http_config(mut self, http: HttpConfig) -> Self {
        self.http = http;
        self
    }
}

/// Hosts services and serves connections.
///
/// Each connection reads requests one at a time and runs every invocation
/// on its own task, so replies go out in completion order. Cloning is cheap
/// and clones share the service table.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    services: DashMap<String, Arc<ServiceDescriptor>>,
    config: ServerConfig,
    shutdown: CancellationToken,
    connections: TaskTracker,
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    /// Create a server. The [`Heartbeat`] service is always registered.
    pub fn with_config(config: ServerConfig) -> Self {
        let services = DashMap::new();
        match ServiceDescriptor::new(Heartbeat, None) {
            Ok(heartbeat) => {
                services.insert(heartbeat.name().to_string(), Arc::new(heartbeat));
            }
            Err(err) => warn!(error = %err, "heartbeat service unavailable"),
        }
        Self {
            inner: Arc::new(ServerInner {
                services,
                config,
                shutdown: CancellationToken::new(),
                connections: TaskTracker::new(),
            }),
        }
    }

    /// Register `receiver` under its type name.
    pub fn register<S: Service>(&self, receiver: S) -> Result<()> {
        self.add(ServiceDescriptor::new(receiver, None)?)
    }

    /// Register `receiver` under an explicit name.
    pub fn register_name<S: Service>(&self, name: &str, receiver: S) -> Result<()> {
        self.add(ServiceDescriptor::new(receiver, Some(name))?)
    }

    fn add(&self, service: ServiceDescriptor) -> Result<()> {
        match self.inner.services.entry(service.name().to_string()) {
            Entry::Occupied(entry) => Err(RpcError::Register(format!(
                "rpc: service already defined: {}",
                entry.key()
            ))),
            Entry::Vacant(entry) => {
                info!(
                    service = service.name(),
                    methods = service.methods().count(),
                    "service registered"
                );
                entry.insert(Arc::new(service));
                Ok(())
            }
        }
    }

    /// Decode a request body for `service.method`.
    pub fn decode_arg(&self, service: &str, method: &str, body: &[u8]) -> Result<DecodedArg> {
        self.service(service)?.decode_arg(method, body)
    }

    /// Invoke `service.method` with a decoded argument and return the encoded reply.
    pub fn call(&self, service: &str, method: &str, arg: DecodedArg) -> Result<Bytes> {
        self.service(service)?.call(method, arg)
    }

    /// Registered services, sorted by name.
    pub fn services(&self) -> Vec<ServiceInfo> {
        let mut services: Vec<ServiceInfo> = self
            .inner
            .services
            .iter()
            .map(|entry| entry.value().info())
            .collect();
        services.sort_by(|a, b| a.name.cmp(&b.name));
        services
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    fn service(&self, name: &str) -> Result<Arc<ServiceDescriptor>> {
        self.inner
            .services
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| RpcError::Failure(format!("rpc: can't find service {name}")))
    }

    /// Serve one connection until the peer disconnects or the server shuts down.
    pub async fn serve_conn<S: RpcStream>(&self, stream: S, kind: CodecKind) {
        self.serve_conn_with_cancel(stream, kind, CancellationToken::new())
            .await;
    }

    /// Like [`serve_conn`](Self::serve_conn), but also stops when `cancel` fires.
    ///
    /// In-flight invocations always finish and write their responses before
    /// the connection is closed.
    pub async fn serve_conn_with_cancel<S: RpcStream>(
        &self,
        stream: S,
        kind: CodecKind,
        cancel: CancellationToken,
    ) {
        let (mut reader, writer) = split(stream, kind, &self.inner.config.frame);
        let writer = Arc::new(Mutex::new(writer));
        let invocations = TaskTracker::new();

        loop {
            let header = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = self.inner.shutdown.cancelled() => break,
                header = reader.read_request_header() => header,
            };
            let header = match header {
                Ok(header) => header,
                Err(err) => {
                    if !err.is_eof() {
                        debug!(codec = %kind, error = %err, "request read failed");
                    }
                    break;
                }
            };

            let service = self.service(&header.service);
            let body = match reader.read_body().await {
                Ok(body) => body,
                Err(err) => {
                    debug!(request_id = header.request_id, error = %err, "request body read failed");
                    break;
                }
            };

            let prepared = service.and_then(|service| {
                let arg = service.decode_arg(&header.method, &body)?;
                Ok((service, arg))
            });
            let (service, arg) = match prepared {
                Ok(prepared) => prepared,
                Err(err) => {
                    debug!(
                        request_id = header.request_id,
                        service = %header.service,
                        method = %header.method,
                        error = %err,
                        "rejecting request"
                    );
                    let response = ResponseHeader::reply_to(&header).with_failure(err.to_string());
                    send_response(&writer, &response, INVALID_REQUEST).await;
                    continue;
                }
            };

            let writer = Arc::clone(&writer);
            invocations.spawn(async move {
                let (response, reply) = invoke(service, header, arg).await;
                send_response(&writer, &response, &reply).await;
            });
        }

        invocations.close();
        invocations.wait().await;
        let closed = writer.lock().await.close().await;
        if let Err(err) = closed {
            debug!(error = %err, "closing server codec");
        }
    }

    /// Accept raw TCP connections until [`shutdown`](Self::shutdown).
    pub async fn accept(&self, transport: TcpTransport, kind: CodecKind) -> Result<()> {
        info!(addr = %transport.local_addr(), codec = %kind, "serving rpc over tcp");
        loop {
            let accepted = tokio::select! {
                () = self.inner.shutdown.cancelled() => return Ok(()),
                accepted = transport.accept() => accepted,
            };
            let (stream, peer) = accepted?;
            let server = self.clone();
            self.inner.connections.spawn(async move {
                server.serve_conn(stream, kind).await;
                debug!(%peer, "connection finished");
            });
        }
    }

    /// Accept connections that bootstrap with HTTP `CONNECT` until
    /// [`shutdown`](Self::shutdown).
    pub async fn serve_http(&self, transport: TcpTransport, kind: CodecKind) -> Result<()> {
        info!(
            addr = %transport.local_addr(),
            path = %self.inner.config.http.path,
            codec = %kind,
            "serving rpc over http connect"
        );
        loop {
            let accepted = tokio::select! {
                () = self.inner.shutdown.cancelled() => return Ok(()),
                accepted = transport.accept() => accepted,
            };
            let (mut stream, peer) = accepted?;
            let server = self.clone();
            self.inner.connections.spawn(async move {
                if let Err(err) = handshake_server(&mut stream, &server.inner.config.http).await {
                    debug!(%peer, error = %err, "http bootstrap rejected");
                    return;
                }
                server.serve_conn(stream, kind).await;
                debug!(%peer, "connection finished");
            });
        }
    }

    /// Stop accepting, stop reading new requests, and wait for every
    /// connection to drain.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.connections.close();
        self.inner.connections.wait().await;
        info!("server stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.inner.services.iter().map(|e| e.key().clone()).collect();
        f.debug_struct("Server").field("services", &names).finish()
    }
}

/// Run the method on the blocking pool and build its response.
async fn invoke(
    service: Arc<ServiceDescriptor>,
    header: RequestHeader,
    arg: DecodedArg,
) -> (ResponseHeader, Bytes) {
    let method = header.method.clone();
    let outcome = tokio::task::spawn_blocking(move || service.call(&method, arg)).await;
    let response = ResponseHeader::reply_to(&header);
    let invalid = Bytes::from_static(INVALID_REQUEST);
    match outcome {
        Ok(Ok(reply)) => (response, reply),
        Ok(Err(RpcError::Application(err))) => (response.with_error(err), invalid),
        Ok(Err(err)) => (response.with_failure(err.to_string()), invalid),
        Err(err) => {
            warn!(
                request_id = header.request_id,
                service = %header.service,
                method = %header.method,
                error = %err,
                "method panicked"
            );
            let failure = format!("rpc: method {} panicked", header.service_method());
            (response.with_failure(failure), invalid)
        }
    }
}

async fn send_response(writer: &Mutex<CodecWriter>, header: &ResponseHeader, body: &[u8]) {
    let mut writer = writer.lock().await;
    if let Err(err) = writer.write_response(header, body).await {
        debug!(request_id = header.request_id, error = %err, "response write failed");
    }
}
