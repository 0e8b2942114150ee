use std::fmt;
use std::io;

use muxcall_frame::FrameError;
use muxcall_rpc::RpcError;
use muxcall_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: &io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::AddrInUse
        | io::ErrorKind::AddrNotAvailable => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: &TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. } | TransportError::Connect { source, .. } => {
            io_error(context, source)
        }
        TransportError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: &FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::PayloadTooLarge { .. }
        | FrameError::InvalidPackage { .. }
        | FrameError::TruncatedValue { .. }
        | FrameError::Encode(_)
        | FrameError::Decode(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        FrameError::ConnectionClosed | FrameError::Closed => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
    }
}

pub fn rpc_error(context: &str, err: &RpcError) -> CliError {
    match err {
        RpcError::Transport(err) => transport_error(context, err),
        RpcError::Codec(err) => frame_error(context, err),
        RpcError::Application(_) => CliError::new(FAILURE, format!("{context}: {err}")),
        RpcError::Failure(_) | RpcError::Decode(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        RpcError::InvalidServiceMethod(_) => CliError::new(USAGE, format!("{context}: {err}")),
        RpcError::HeartbeatTimeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        RpcError::Shutdown | RpcError::UnexpectedEof | RpcError::Heartbeat(_) => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
        RpcError::Register(_) => CliError::new(INTERNAL, format!("{context}: {err}")),
    }
}
