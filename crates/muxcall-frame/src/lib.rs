//! Message headers and codecs for muxcall.
//!
//! Every request and response travels as two parts, a header followed by a
//! body. Both parts are MessagePack values. Two interchangeable codecs carry
//! them over a byte stream:
//!
//! - [`CodecKind::Stream`]: the two values are written back to back and the
//!   reader finds their boundaries by decoding them.
//! - [`CodecKind::Framed`]: each part is an independent frame with a 4-byte
//!   big-endian length prefix. The nil value travels as a zero-length frame.
//!
//! The read side ([`CodecReader`]) is consumed by exactly one task; the write
//! side ([`CodecWriter`]) is shared behind a mutex by its owner.

pub mod codec;
pub mod error;
pub mod header;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_frame, encode_frame, CodecKind, FrameCodec, FrameConfig, ValueCodec,
    DEFAULT_MAX_PAYLOAD, LENGTH_PREFIX_SIZE,
};
pub use error::{FrameError, Result};
pub use header::{decode_value, encode_value, Empty, RequestHeader, ResponseHeader, NIL};
pub use reader::CodecReader;
pub use writer::CodecWriter;

use muxcall_transport::RpcStream;
use tokio_util::sync::CancellationToken;

/// Split a connected stream into the codec's read and write sides.
///
/// The two sides share a close signal: closing the writer, or any write
/// failure, unblocks a read that is pending on the reader.
pub fn split<S: RpcStream>(stream: S, kind: CodecKind, config: &FrameConfig) -> (CodecReader, CodecWriter) {
    let (read_half, write_half) = tokio::io::split(stream);
    let close_signal = CancellationToken::new();
    let reader = CodecReader::new(Box::new(read_half), kind, config, close_signal.clone());
    let writer = CodecWriter::new(Box::new(write_half), kind, config, close_signal);
    (reader, writer)
}
