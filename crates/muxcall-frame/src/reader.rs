use bytes::Bytes;
use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;

use crate::codec::{CodecKind, FrameCodec, FrameConfig, ValueCodec};
use crate::error::{FrameError, Result};
use crate::header::{decode_value, RequestHeader, ResponseHeader, NIL};

type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;

enum Parts {
    Stream(FramedRead<BoxedRead, ValueCodec>),
    Framed(FramedRead<BoxedRead, FrameCodec>),
}

impl Parts {
    async fn next(&mut self) -> Option<Result<Bytes>> {
        match self {
            Parts::Stream(inner) => inner.next().await,
            Parts::Framed(inner) => inner.next().await,
        }
    }
}

/// Read side of a codec.
///
/// Yields header and body parts in the order they were written. Callers must
/// alternate header and body reads; every header is followed by exactly one
/// body, which has to be consumed (or discarded) before the next header.
pub struct CodecReader {
    parts: Parts,
    kind: CodecKind,
    close_signal: CancellationToken,
}

impl CodecReader {
    pub(crate) fn new(
        inner: BoxedRead,
        kind: CodecKind,
        config: &FrameConfig,
        close_signal: CancellationToken,
    ) -> Self {
        let parts = match kind {
            CodecKind::Stream => Parts::Stream(FramedRead::new(inner, ValueCodec::new(config))),
            CodecKind::Framed => Parts::Framed(FramedRead::new(inner, FrameCodec::new(config))),
        };
        Self {
            parts,
            kind,
            close_signal,
        }
    }

    pub async fn read_request_header(&mut self) -> Result<RequestHeader> {
        let part = self.next_part().await?;
        decode_value(&part)
    }

    pub async fn read_response_header(&mut self) -> Result<ResponseHeader> {
        let part = self.next_part().await?;
        decode_value(&part)
    }

    /// Read the raw body that follows a header.
    ///
    /// Framed bodies of length zero are returned as the nil value, so the
    /// result always decodes the same way for both codecs.
    pub async fn read_body(&mut self) -> Result<Bytes> {
        let part = self.next_part().await?;
        if part.is_empty() && self.kind == CodecKind::Framed {
            return Ok(Bytes::from_static(&[NIL]));
        }
        Ok(part)
    }

    /// Consume and drop the body that follows a header.
    pub async fn discard_body(&mut self) -> Result<()> {
        self.next_part().await.map(drop)
    }

    pub fn kind(&self) -> CodecKind {
        self.kind
    }

    /// Whether the shared close signal has fired.
    pub fn is_closed(&self) -> bool {
        self.close_signal.is_cancelled()
    }

    async fn next_part(&mut self) -> Result<Bytes> {
        let next = tokio::select! {
            biased;
            () = self.close_signal.cancelled() => return Err(FrameError::Closed),
            next = self.parts.next() => next,
        };
        match next {
            Some(part) => part,
            None => Err(FrameError::ConnectionClosed),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::{BufMut, BytesMut};
    use tokio::io::{duplex, AsyncWriteExt};

    use super::*;
    use crate::codec::encode_frame;
    use crate::header::encode_value;

    fn reader_over(
        kind: CodecKind,
    ) -> (CodecReader, tokio::io::DuplexStream, CancellationToken) {
        let (left, right) = duplex(64 * 1024);
        let token = CancellationToken::new();
        let reader = CodecReader::new(
            Box::new(left),
            kind,
            &FrameConfig::default(),
            token.clone(),
        );
        (reader, right, token)
    }

    #[tokio::test]
    async fn framed_zero_length_body_reads_as_nil() {
        let (mut reader, mut peer, _token) = reader_over(CodecKind::Framed);
        let mut buf = BytesMut::new();
        let header = encode_value(&RequestHeader::new("Echo", "Echo_", 1)).unwrap();
        encode_frame(&header, &mut buf).unwrap();
        encode_frame(b"", &mut buf).unwrap();
        peer.write_all(&buf).await.unwrap();

        let header = reader.read_request_header().await.unwrap();
        assert_eq!(header.request_id, 1);
        assert_eq!(reader.read_body().await.unwrap().as_ref(), &[NIL]);
    }

    #[tokio::test]
    async fn stream_parts_arrive_in_pieces() {
        let (mut reader, mut peer, _token) = reader_over(CodecKind::Stream);
        let mut wire = Vec::new();
        wire.extend_from_slice(&encode_value(&RequestHeader::new("Arith", "Add_", 7)).unwrap());
        wire.extend_from_slice(&encode_value(&(3u32, 4u32)).unwrap());

        let writer = tokio::spawn(async move {
            for chunk in wire.chunks(3) {
                peer.write_all(chunk).await.unwrap();
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            peer
        });

        let header = reader.read_request_header().await.unwrap();
        assert_eq!(header.method, "Add_");
        let body = reader.read_body().await.unwrap();
        let args: (u32, u32) = decode_value(&body).unwrap();
        assert_eq!(args, (3, 4));
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn clean_eof_between_messages() {
        let (mut reader, peer, _token) = reader_over(CodecKind::Framed);
        drop(peer);
        let err = reader.read_response_header().await.unwrap_err();
        assert!(err.is_eof());
    }

    #[tokio::test]
    async fn truncated_frame_is_invalid_package() {
        let (mut reader, mut peer, _token) = reader_over(CodecKind::Framed);
        let mut buf = BytesMut::new();
        buf.put_u32(100);
        buf.put_slice(&[0u8; 10]);
        peer.write_all(&buf).await.unwrap();
        drop(peer);

        let err = reader.read_body().await.unwrap_err();
        assert!(matches!(
            err,
            FrameError::InvalidPackage {
                expected: 100,
                available: 10
            }
        ));
    }

    #[tokio::test]
    async fn close_signal_unblocks_pending_read() {
        let (mut reader, _peer, token) = reader_over(CodecKind::Stream);
        let pending = tokio::spawn(async move { reader.read_response_header().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(FrameError::Closed)));
    }
}
