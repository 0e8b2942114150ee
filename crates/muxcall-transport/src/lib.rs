//! Byte-stream transports for muxcall.
//!
//! This is the lowest layer of muxcall. The RPC layers above only ever see a
//! [`BoxedStream`]: a duplex byte stream obtained either from a raw TCP
//! connection or from a TCP connection that completed the HTTP `CONNECT`
//! bootstrap handshake.

pub mod error;
pub mod http;
pub mod tcp;
pub mod traits;

pub use error::{Result, TransportError};
pub use http::{
    handshake_client, handshake_server, HttpConfig, HttpDialer, CONNECTED_STATUS, DEFAULT_RPC_PATH,
};
pub use tcp::{TcpDialer, TcpTransport};
pub use traits::{BoxedStream, Dial, RpcStream};
