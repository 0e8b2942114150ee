use std::sync::Arc;
use std::time::Duration;

use muxcall_frame::FrameError;
use muxcall_transport::TransportError;

/// Errors surfaced by clients, servers and the reconnecting proxy.
///
/// Cloneable so a single terminal error can complete every pending call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RpcError {
    /// The client was closed, or had already shut down when the call was made.
    #[error("connection is shut down")]
    Shutdown,

    /// The peer went away while calls were still pending.
    #[error("unexpected EOF")]
    UnexpectedEof,

    /// The server could not deliver the call (unknown service or method,
    /// undecodable argument).
    #[error("{0}")]
    Failure(String),

    /// The invoked method returned an error.
    #[error("{0}")]
    Application(String),

    /// The call name is not of the form `Service.Method`.
    #[error("rpc: service/method request ill-formed: {0:?}")]
    InvalidServiceMethod(String),

    /// A service could not be registered.
    #[error("{0}")]
    Register(String),

    /// Encoding, decoding or framing failed on the connection.
    #[error("codec error: {0}")]
    Codec(Arc<FrameError>),

    /// Dialing or the HTTP bootstrap failed.
    #[error("transport error: {0}")]
    Transport(Arc<TransportError>),

    /// The reply body did not decode into the requested type.
    #[error("reading body: {0}")]
    Decode(String),

    /// No heartbeat reply arrived in time.
    #[error("heartbeat timed out after {0:?}")]
    HeartbeatTimeout(Duration),

    /// The heartbeat reply was not the expected one.
    #[error("heartbeat failed: {0}")]
    Heartbeat(String),
}

impl RpcError {
    /// True for the errors a pending call sees when its connection goes away.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, RpcError::Shutdown | RpcError::UnexpectedEof)
    }
}

impl From<FrameError> for RpcError {
    fn from(err: FrameError) -> Self {
        RpcError::Codec(Arc::new(err))
    }
}

impl From<TransportError> for RpcError {
    fn from(err: TransportError) -> Self {
        RpcError::Transport(Arc::new(err))
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;
