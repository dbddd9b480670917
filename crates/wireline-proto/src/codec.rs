//! Line-delimited framing over an async byte stream.
//!
//! Encoding is one JSON envelope per `\n`-terminated line. Decoding is a
//! lazy, restartable sequence of envelopes: records may be split or merged
//! arbitrarily across underlying reads, so [`FrameReader`] buffers partial
//! lines until a delimiter arrives. A complete line that fails to decode is
//! reported as [`CodecError::Malformed`] — never silently dropped.

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::envelope::Envelope;

/// Maximum length of a single frame (16 MiB). Bounds the codec's buffering
/// against a peer that never sends a delimiter.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Errors from the framing layer.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// A complete line arrived but was not a well-formed envelope.
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("frame exceeds {MAX_FRAME_SIZE} bytes")]
    FrameTooLarge,
    /// The stream ended in the middle of a record.
    #[error("stream ended mid-frame")]
    TruncatedFrame,
}

/// Encode one envelope as a delimited record.
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
    let mut line = serde_json::to_vec(envelope).map_err(CodecError::Malformed)?;
    line.push(b'\n');
    Ok(line)
}

/// Incremental frame decoder over any [`AsyncRead`].
///
/// `next_frame` is cancel-safe: bytes received for a partial record stay in
/// the internal buffer across cancelled calls, so the reader can sit inside
/// a `tokio::select!` loop.
pub struct FrameReader<R> {
    reader: R,
    buf: BytesMut,
    eof: bool,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: BytesMut::with_capacity(4096),
            eof: false,
        }
    }

    /// Read the next complete envelope.
    ///
    /// Returns `Ok(None)` on a clean end of stream (no partial record
    /// pending). Blank lines are skipped.
    pub async fn next_frame(&mut self) -> Result<Option<Envelope>, CodecError> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let line = self.buf.split_to(pos + 1);
                let mut line = &line[..line.len() - 1];
                if line.ends_with(b"\r") {
                    line = &line[..line.len() - 1];
                }
                if line.is_empty() {
                    continue;
                }
                return serde_json::from_slice(line)
                    .map(Some)
                    .map_err(CodecError::Malformed);
            }
            if self.buf.len() > MAX_FRAME_SIZE {
                return Err(CodecError::FrameTooLarge);
            }
            if self.eof {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(CodecError::TruncatedFrame);
            }
            if self.reader.read_buf(&mut self.buf).await? == 0 {
                self.eof = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Kind;
    use serde_json::json;

    #[tokio::test]
    async fn test_encode_decode_roundtrip() {
        let envelopes = vec![
            Envelope::msg(json!("hello")),
            Envelope::ask(0, json!({"q": 1})),
            Envelope::obs_complete(42),
            Envelope::ping(),
        ];
        let mut bytes = Vec::new();
        for env in &envelopes {
            bytes.extend_from_slice(&encode(env).unwrap());
        }

        let mut reader = FrameReader::new(&bytes[..]);
        for env in &envelopes {
            let decoded = reader.next_frame().await.unwrap().unwrap();
            assert_eq!(&decoded, env);
        }
        assert!(reader.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_records_split_across_reads() {
        // Feed one record byte-split at awkward places plus two merged ones.
        let io = tokio_test::io::Builder::new()
            .read(b"{\"t\":\"ms")
            .read(b"g\",\"d\":\"te")
            .read(b"st1\"}\n{\"t\":\"msg\",\"d\":\"test2\"}\n{\"t\":\"ping\"}\n")
            .build();
        let mut reader = FrameReader::new(io);

        let first = reader.next_frame().await.unwrap().unwrap();
        assert_eq!(first.payload, Some(json!("test1")));
        let second = reader.next_frame().await.unwrap().unwrap();
        assert_eq!(second.payload, Some(json!("test2")));
        let third = reader.next_frame().await.unwrap().unwrap();
        assert_eq!(third.kind, Kind::Ping);
    }

    #[tokio::test]
    async fn test_malformed_line_is_an_error_not_a_skip() {
        let bytes = b"not json at all\n{\"t\":\"ping\"}\n";
        let mut reader = FrameReader::new(&bytes[..]);
        assert!(matches!(
            reader.next_frame().await,
            Err(CodecError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_eof_mid_record_is_truncated() {
        let bytes = b"{\"t\":\"msg\",\"d\":\"cut off";
        let mut reader = FrameReader::new(&bytes[..]);
        assert!(matches!(
            reader.next_frame().await,
            Err(CodecError::TruncatedFrame)
        ));
    }

    #[tokio::test]
    async fn test_frame_over_size_cap_is_rejected() {
        // A delimiter-free stream longer than the cap must be refused
        // instead of buffered without bound.
        let bytes = vec![b'x'; MAX_FRAME_SIZE + 1];
        let mut reader = FrameReader::new(&bytes[..]);
        assert!(matches!(
            reader.next_frame().await,
            Err(CodecError::FrameTooLarge)
        ));
    }

    #[tokio::test]
    async fn test_blank_lines_are_skipped() {
        let bytes = b"\n\r\n{\"t\":\"ping\"}\n";
        let mut reader = FrameReader::new(&bytes[..]);
        let env = reader.next_frame().await.unwrap().unwrap();
        assert_eq!(env.kind, Kind::Ping);
    }
}
