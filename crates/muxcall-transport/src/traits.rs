use std::future::Future;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// A connected duplex byte stream.
///
/// Anything that is `AsyncRead + AsyncWrite` qualifies: TCP streams, hijacked
/// HTTP sockets, in-memory `tokio::io::duplex` pipes in tests.
pub trait RpcStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> RpcStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Type-erased stream handed from dialers to the codec layer.
pub type BoxedStream = Box<dyn RpcStream>;

/// Produces connected streams for a remote address.
///
/// The reconnecting proxy dials through this seam, so tests can script
/// failures without touching the network.
pub trait Dial: Send + Sync + 'static {
    /// Open a new connection to `addr`.
    fn dial(&self, addr: &str) -> impl Future<Output = Result<BoxedStream>> + Send;
}
