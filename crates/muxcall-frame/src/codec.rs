use std::fmt;
use std::io::{Cursor, ErrorKind};
use std::str::FromStr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::{Deserialize, IgnoredAny};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{FrameError, Result};

/// Frame length prefix: 4 bytes, big-endian.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Which wire codec a connection speaks. Both ends must agree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CodecKind {
    /// Self-delimiting values written back to back.
    Stream,
    /// Length-prefixed frames, one per part.
    #[default]
    Framed,
}

impl CodecKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodecKind::Stream => "stream",
            CodecKind::Framed => "framed",
        }
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CodecKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stream" => Ok(CodecKind::Stream),
            "framed" => Ok(CodecKind::Framed),
            other => Err(format!("unknown codec {other:?}; expected stream or framed")),
        }
    }
}

/// Configuration shared by both codecs.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum size of a single header or body in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl FrameConfig {
    pub fn with_max_payload_size(mut self, max_payload_size: usize) -> Self {
        self.max_payload_size = max_payload_size;
        self
    }
}

/// Encode one frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────────┬─────────────────────┐
/// │ Length (4B BE)   │ Payload             │
/// │ u32              │ (Length bytes)      │
/// └──────────────────┴─────────────────────┘
/// ```
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > u32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        });
    }
    dst.reserve(LENGTH_PREFIX_SIZE + payload.len());
    dst.put_u32(payload.len() as u32);
    dst.put_slice(payload);
    Ok(())
}

/// Decode one frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Bytes>> {
    if src.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    prefix.copy_from_slice(&src[..LENGTH_PREFIX_SIZE]);
    let payload_len = u32::from_be_bytes(prefix) as usize;

    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    let total = LENGTH_PREFIX_SIZE + payload_len;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None);
    }

    src.advance(LENGTH_PREFIX_SIZE);
    Ok(Some(src.split_to(payload_len).freeze()))
}

/// Length-prefixed part codec.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_payload_size: usize,
}

impl FrameCodec {
    pub fn new(config: &FrameConfig) -> Self {
        Self {
            max_payload_size: config.max_payload_size,
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        decode_frame(src, self.max_payload_size)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if src.is_empty() {
            return Ok(None);
        }

        // The stream ended inside a frame.
        let (expected, available) = if src.len() < LENGTH_PREFIX_SIZE {
            (LENGTH_PREFIX_SIZE, src.len())
        } else {
            let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
            prefix.copy_from_slice(&src[..LENGTH_PREFIX_SIZE]);
            (
                u32::from_be_bytes(prefix) as usize,
                src.len() - LENGTH_PREFIX_SIZE,
            )
        };
        src.clear();
        Err(FrameError::InvalidPackage {
            expected,
            available,
        })
    }
}

impl Encoder<&[u8]> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
        if payload.len() > self.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.max_payload_size,
            });
        }
        encode_frame(payload, dst)
    }
}

/// Splits a byte stream into whole MessagePack values.
///
/// Values carry their own length, so the decoder walks one value without
/// materialising it and yields its raw bytes once all of them are buffered.
#[derive(Debug, Clone)]
pub struct ValueCodec {
    max_payload_size: usize,
}

impl ValueCodec {
    pub fn new(config: &FrameConfig) -> Self {
        Self {
            max_payload_size: config.max_payload_size,
        }
    }
}

impl Decoder for ValueCodec {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        if src.is_empty() {
            return Ok(None);
        }
        match value_len(src)? {
            Some(len) if len > self.max_payload_size => Err(FrameError::PayloadTooLarge {
                size: len,
                max: self.max_payload_size,
            }),
            Some(len) => Ok(Some(src.split_to(len).freeze())),
            None if src.len() > self.max_payload_size => Err(FrameError::PayloadTooLarge {
                size: src.len(),
                max: self.max_payload_size,
            }),
            None => Ok(None),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        if let Some(value) = self.decode(src)? {
            return Ok(Some(value));
        }
        if src.is_empty() {
            return Ok(None);
        }
        let available = src.len();
        src.clear();
        Err(FrameError::TruncatedValue { available })
    }
}

/// Length of the first complete value in `buf`, or `None` if it is cut short.
fn value_len(buf: &[u8]) -> Result<Option<usize>> {
    let mut cursor = Cursor::new(buf);
    let walked = {
        let mut de = rmp_serde::Deserializer::new(&mut cursor);
        IgnoredAny::deserialize(&mut de)
    };
    match walked {
        Ok(IgnoredAny) => Ok(Some(cursor.position() as usize)),
        Err(err) if is_incomplete(&err) => Ok(None),
        Err(err) => Err(FrameError::Decode(err)),
    }
}

fn is_incomplete(err: &rmp_serde::decode::Error) -> bool {
    match err {
        rmp_serde::decode::Error::InvalidMarkerRead(io)
        | rmp_serde::decode::Error::InvalidDataRead(io) => io.kind() == ErrorKind::UnexpectedEof,
        _ => false,
    }
}
