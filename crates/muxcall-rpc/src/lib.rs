//! Multiplexed RPC over a single byte-stream connection.
//!
//! - [`Client`] issues any number of concurrent calls over one connection
//!   and matches responses to callers by request ID.
//! - [`Server`] hosts [`Service`]s and serves raw TCP or HTTP `CONNECT`
//!   connections, running each invocation on its own task.
//! - [`ReconnectingClient`] keeps a client connected, probing it with the
//!   [`Heartbeat`] service and publishing every state transition.

pub mod client;
pub mod error;
pub mod heartbeat;
pub mod pending;
pub mod reconnect;
pub mod registry;
pub mod server;

pub use client::{parse_service_method, Client, ClientConfig, DEFAULT_DELIVERY_RETRY_DELAY};
pub use error::{Result, RpcError};
pub use heartbeat::{Heartbeat, HEARTBEAT_METHOD, HEARTBEAT_SERVICE, PING, PONG};
pub use pending::{Call, Pending};
pub use reconnect::{ConnectionState, ProxyConfig, ReconnectingClient, StateEvent};
pub use registry::{
    DecodedArg, MethodDescriptor, MethodInfo, MethodSet, Service, ServiceDescriptor, ServiceInfo,
    METHOD_SUFFIX,
};
pub use server::{Server, ServerConfig};

pub use muxcall_frame::{CodecKind, Empty, FrameConfig};
pub use muxcall_transport::{Dial, HttpConfig, HttpDialer, TcpDialer, TcpTransport};
