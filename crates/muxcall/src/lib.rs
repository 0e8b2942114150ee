//! Multiplexed RPC over a single byte-stream connection.
//!
//! Many concurrent calls share one TCP connection (optionally bootstrapped
//! through HTTP `CONNECT`) and are matched to their callers by request ID.
//! Services are registered explicitly, method by method, and a reconnecting
//! client keeps a connection alive with heartbeats.
//!
//! # Crate Structure
//!
//! - [`transport`]: byte streams, TCP, the HTTP bootstrap and the `Dial` seam
//! - [`frame`]: headers plus the stream and framed codecs
//! - [`rpc`]: client, service registry, server and reconnecting proxy
//!
//! The most used types are also re-exported at the crate root.

/// Re-export transport types.
pub mod transport {
    pub use muxcall_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use muxcall_frame::*;
}

/// Re-export rpc types.
pub mod rpc {
    pub use muxcall_rpc::*;
}

pub use muxcall_rpc::{
    Call, Client, ClientConfig, CodecKind, ConnectionState, Empty, MethodSet, Pending,
    ProxyConfig, ReconnectingClient, RpcError, Server, ServerConfig, Service, StateEvent,
};
