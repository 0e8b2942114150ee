use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio_util::codec::Encoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::codec::{CodecKind, FrameCodec, FrameConfig};
use crate::error::{FrameError, Result};
use crate::header::{encode_value, RequestHeader, ResponseHeader, NIL};

type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Write side of a codec.
///
/// Each call writes one complete message (header then body) and flushes it.
/// Owners share the writer behind a mutex so messages never interleave.
/// A failed write closes the writer, which also fires the close signal
/// shared with the reader.
pub struct CodecWriter {
    inner: BufWriter<BoxedWrite>,
    kind: CodecKind,
    frames: FrameCodec,
    buf: BytesMut,
    max_payload_size: usize,
    closed: bool,
    close_signal: CancellationToken,
}

impl CodecWriter {
    pub(crate) fn new(
        inner: BoxedWrite,
        kind: CodecKind,
        config: &FrameConfig,
        close_signal: CancellationToken,
    ) -> Self {
        Self {
            inner: BufWriter::new(inner),
            kind,
            frames: FrameCodec::new(config),
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            max_payload_size: config.max_payload_size,
            closed: false,
            close_signal,
        }
    }

    /// Write a request header followed by an already-encoded body.
    pub async fn write_request(&mut self, header: &RequestHeader, body: &[u8]) -> Result<()> {
        let header = encode_value(header)?;
        self.write_message(&header, body).await
    }

    /// Write a response header followed by an already-encoded body.
    pub async fn write_response(&mut self, header: &ResponseHeader, body: &[u8]) -> Result<()> {
        let header = encode_value(header)?;
        self.write_message(&header, body).await
    }

    /// Close the underlying stream. Safe to call more than once.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.close_signal.cancel();
        debug!(codec = %self.kind, "closing codec");
        // Complete messages are always flushed; anything still buffered
        // belongs to an aborted write and is dropped.
        self.inner.get_mut().shutdown().await.map_err(FrameError::Io)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn kind(&self) -> CodecKind {
        self.kind
    }

    /// The close signal shared with the reader. Cancelling it aborts any
    /// write in progress.
    pub fn close_signal(&self) -> CancellationToken {
        self.close_signal.clone()
    }

    async fn write_message(&mut self, header: &[u8], body: &[u8]) -> Result<()> {
        if self.closed {
            return Err(FrameError::Closed);
        }
        if body.len() > self.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: body.len(),
                max: self.max_payload_size,
            });
        }

        let signal = self.close_signal.clone();
        let result = tokio::select! {
            biased;
            () = signal.cancelled() => Err(FrameError::Closed),
            written = self.write_parts(header, body) => written,
        };
        if let Err(err) = &result {
            warn!(codec = %self.kind, error = %err, "write failed, closing codec");
            let _ = self.close().await;
        }
        result
    }

    async fn write_parts(&mut self, header: &[u8], body: &[u8]) -> Result<()> {
        match self.kind {
            CodecKind::Stream => {
                self.inner.write_all(header).await?;
                self.inner.write_all(body).await?;
            }
            CodecKind::Framed => {
                // Nil travels as an empty frame.
                let body = if *body == [NIL] { &[][..] } else { body };
                self.buf.clear();
                self.frames.encode(header, &mut self.buf)?;
                self.frames.encode(body, &mut self.buf)?;
                self.inner.write_all(&self.buf).await?;
            }
        }
        self.inner.flush().await?;
        Ok(())
    }
}
