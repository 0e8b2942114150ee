//! HTTP `CONNECT` bootstrap.
//!
//! A client that can only reach the server through HTTP infrastructure opens
//! a TCP connection, sends `CONNECT <path> HTTP/1.0`, and waits for the fixed
//! confirmation status line. From then on the socket carries the raw RPC
//! protocol with no further HTTP framing.

use std::io::ErrorKind;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::error::{Result, TransportError};
use crate::tcp::TcpTransport;
use crate::traits::{BoxedStream, Dial};

/// Default path the HTTP front-end accepts `CONNECT` requests on.
pub const DEFAULT_RPC_PATH: &str = "/_muxcall_";

/// Status line written after a successful `CONNECT`, without the trailing CRLF.
pub const CONNECTED_STATUS: &str = "HTTP/1.0 200 Connected to muxcall RPC";

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Configuration for the HTTP bootstrap handshake.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Request path the `CONNECT` must target.
    pub path: String,
    /// Deadline for the whole handshake exchange.
    pub timeout: Duration,
    /// Maximum size of a request or response head in bytes.
    pub max_head_size: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_RPC_PATH.to_string(),
            timeout: Duration::from_secs(5),
            max_head_size: 8 * 1024,
        }
    }
}

impl HttpConfig {
    /// Override the `CONNECT` path.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }
}

/// Perform the client side of the bootstrap on an already-connected stream.
pub async fn handshake_client<S>(stream: &mut S, config: &HttpConfig) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    validate_path(&config.path)?;
    tokio::time::timeout(config.timeout, client_exchange(stream, config))
        .await
        .map_err(|_| TransportError::Timeout(config.timeout))?
}

/// Perform the server side of the bootstrap on an accepted stream.
///
/// Anything other than `CONNECT` to the configured path is answered with an
/// HTTP error and reported as a handshake failure; the caller drops the socket.
pub async fn handshake_server<S>(stream: &mut S, config: &HttpConfig) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    tokio::time::timeout(config.timeout, server_exchange(stream, config))
        .await
        .map_err(|_| TransportError::Timeout(config.timeout))?
}

async fn client_exchange<S>(stream: &mut S, config: &HttpConfig) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = format!("CONNECT {} HTTP/1.0\r\n\r\n", config.path);
    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;

    let head = read_head(stream, config.max_head_size).await?;
    let status = head.lines().next().unwrap_or_default();
    if status != CONNECTED_STATUS {
        return Err(TransportError::Handshake(format!(
            "unexpected HTTP response: {status:?}"
        )));
    }
    Ok(())
}

async fn server_exchange<S>(stream: &mut S, config: &HttpConfig) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let head = read_head(stream, config.max_head_size).await?;
    let request_line = head.lines().next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let path = parts.next().unwrap_or_default();

    if method != "CONNECT" {
        write_error(stream, "405 Method Not Allowed", "405 must CONNECT\n").await?;
        return Err(TransportError::Handshake(format!(
            "method {method:?} not allowed"
        )));
    }

    if path != config.path {
        write_error(stream, "404 Not Found", "404 page not found\n").await?;
        return Err(TransportError::Handshake(format!("unknown path {path:?}")));
    }

    stream
        .write_all(format!("{CONNECTED_STATUS}\r\n\r\n").as_bytes())
        .await?;
    stream.flush().await?;
    debug!(path, "http connect accepted");
    Ok(())
}

async fn write_error<S>(stream: &mut S, status: &str, body: &str) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let response = format!(
        "HTTP/1.0 {status}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

/// Read an HTTP head up to and including the blank line.
///
/// Reads one byte at a time so nothing past the head is consumed: the bytes
/// that follow belong to the RPC protocol.
async fn read_head<S>(stream: &mut S, max_head_size: usize) -> Result<String>
where
    S: AsyncRead + Unpin,
{
    let mut head = Vec::with_capacity(128);
    loop {
        let byte = match stream.read_u8().await {
            Ok(byte) => byte,
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => {
                return Err(TransportError::HandshakeClosed)
            }
            Err(err) => return Err(TransportError::Io(err)),
        };
        head.push(byte);

        if head.ends_with(HEAD_TERMINATOR) {
            head.truncate(head.len() - HEAD_TERMINATOR.len());
            return String::from_utf8(head)
                .map_err(|_| TransportError::Handshake("head is not valid UTF-8".to_string()));
        }

        if head.len() > max_head_size {
            warn!(max_head_size, "http head too large");
            return Err(TransportError::Handshake(format!(
                "head exceeds {max_head_size} bytes"
            )));
        }
    }
}

fn validate_path(path: &str) -> Result<()> {
    if !path.starts_with('/') || path.chars().any(char::is_whitespace) {
        return Err(TransportError::Handshake(format!("invalid path {path:?}")));
    }
    Ok(())
}

/// Dials TCP and completes the HTTP bootstrap before handing the stream over.
#[derive(Debug, Clone, Default)]
pub struct HttpDialer {
    config: HttpConfig,
}

impl HttpDialer {
    pub fn new(config: HttpConfig) -> Self {
        Self { config }
    }
}

impl Dial for HttpDialer {
    async fn dial(&self, addr: &str) -> Result<BoxedStream> {
        let mut stream = TcpTransport::connect(addr).await?;
        handshake_client(&mut stream, &self.config).await?;
        Ok(Box::new(stream))
    }
}
