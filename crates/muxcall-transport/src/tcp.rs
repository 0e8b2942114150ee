use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::{BoxedStream, Dial};

/// TCP listener transport.
///
/// Provides bind/accept/connect over TCP. Accepted and dialed streams have
/// `TCP_NODELAY` set, since every RPC message is flushed as soon as it is
/// complete.
pub struct TcpTransport {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpTransport {
    /// Bind and listen on `addr`. Port `0` picks an ephemeral port.
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| TransportError::Bind {
                addr: addr.to_string(),
                source,
            })?;

        info!(%local_addr, "listening on tcp");

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Wrap an already-bound tokio listener.
    pub fn from_listener(listener: TcpListener) -> Result<Self> {
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept an incoming connection.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::Accept)?;
        if let Err(err) = stream.set_nodelay(true) {
            debug!(%peer, error = %err, "failed to set TCP_NODELAY");
        }
        debug!(%peer, "accepted connection");
        Ok((stream, peer))
    }

    /// Connect to a listening TCP endpoint.
    pub async fn connect(addr: &str) -> Result<TcpStream> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| TransportError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        if let Err(err) = stream.set_nodelay(true) {
            debug!(addr, error = %err, "failed to set TCP_NODELAY");
        }
        debug!(addr, "connected over tcp");
        Ok(stream)
    }

    /// The address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        "tcp"
    }
}

/// Dials raw TCP connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

impl Dial for TcpDialer {
    async fn dial(&self, addr: &str) -> Result<BoxedStream> {
        let stream = TcpTransport::connect(addr).await?;
        Ok(Box::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[tokio::test]
    async fn bind_accept_connect() {
        let transport = TcpTransport::bind("127.0.0.1:0").await.unwrap();
        let addr = transport.local_addr().to_string();
        assert_ne!(transport.local_addr().port(), 0);

        let client = tokio::spawn(async move {
            let mut stream = TcpTransport::connect(&addr).await.unwrap();
            stream.write_all(b"hello").await.unwrap();
        });

        let (mut server, _peer) = transport.accept().await.unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        client.await.unwrap();
    }

    #[tokio::test]
    async fn connect_refused_reports_address() {
        let transport = TcpTransport::bind("127.0.0.1:0").await.unwrap();
        let addr = transport.local_addr().to_string();
        drop(transport);

        let err = TcpTransport::connect(&addr).await.unwrap_err();
        match err {
            TransportError::Connect { addr: reported, .. } => assert_eq!(reported, addr),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn bind_rejects_invalid_address() {
        let result = TcpTransport::bind("not-an-address").await;
        assert!(matches!(result, Err(TransportError::Bind { .. })));
    }

    #[tokio::test]
    async fn tcp_dialer_returns_boxed_stream() {
        let transport = TcpTransport::bind("127.0.0.1:0").await.unwrap();
        let addr = transport.local_addr().to_string();

        let accept = tokio::spawn(async move {
            let (mut stream, _) = transport.accept().await.unwrap();
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).await.unwrap();
            buf
        });

        let mut stream = TcpDialer.dial(&addr).await.unwrap();
        stream.write_all(b"ping").await.unwrap();
        assert_eq!(&accept.await.unwrap(), b"ping");
    }
}
