//! Framed async reader and writer over a byte transport.

use std::io;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};

use super::frame::{Decoded, Frame, decode_buf, encode};
use crate::core::constants::{HEADER_SIZE, READ_CHUNK_SIZE};
use crate::core::{ErrorCode, MuxError, MuxResult};

/// Reads whole frames from the read half of a transport.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    buf: BytesMut,
    max_frame_size: u32,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap a transport read half.
    pub fn new(inner: R, max_frame_size: u32) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(READ_CHUNK_SIZE),
            max_frame_size,
        }
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` when the transport ends cleanly between frames.
    /// Ending inside a frame is an `UnexpectedEof` transport error.
    pub async fn read_frame(&mut self) -> MuxResult<Option<Frame>> {
        loop {
            let needed = match decode_buf(&mut self.buf, self.max_frame_size)? {
                Decoded::Frame { frame, .. } => return Ok(Some(frame)),
                Decoded::NeedMoreData(needed) => needed,
            };

            // Room for the rest of a large frame in one go.
            self.buf.reserve(needed.max(READ_CHUNK_SIZE));
            if self.inner.read_buf(&mut self.buf).await? == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("transport closed inside a frame ({} bytes pending)", self.buf.len()),
                )
                .into());
            }
        }
    }

    /// Consume and check the connection preface.
    pub async fn read_preface(&mut self, expected: &[u8]) -> MuxResult<()> {
        while self.buf.len() < expected.len() {
            if self.inner.read_buf(&mut self.buf).await? == 0 {
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
            }
        }
        let got = self.buf.split_to(expected.len());
        if got[..] != expected[..] {
            return Err(MuxError::violation(
                ErrorCode::PROTOCOL_ERROR,
                "connection preface mismatch",
            ));
        }
        Ok(())
    }
}

/// Writes frames to the write half of a transport.
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: BufWriter<W>,
    scratch: BytesMut,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Wrap a transport write half.
    pub fn new(inner: W) -> Self {
        Self {
            inner: BufWriter::new(inner),
            scratch: BytesMut::with_capacity(HEADER_SIZE),
        }
    }

    /// Queue one frame. Nothing reaches the transport until the internal
    /// buffer fills or [`flush`](Self::flush) is called.
    pub async fn write_frame(&mut self, frame: &Frame) -> io::Result<()> {
        self.scratch.clear();
        match frame {
            // Skip copying bulk payload into the scratch buffer.
            Frame::Data { payload, .. } => {
                self.inner.write_all(&frame.header().to_bytes()).await?;
                self.inner.write_all(payload).await
            }
            _ => {
                encode(frame, &mut self.scratch);
                self.inner.write_all(&self.scratch).await
            }
        }
    }

    /// Queue raw bytes, used for the connection preface.
    pub async fn write_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.inner.write_all(bytes).await
    }

    /// Flush buffered frames to the transport.
    pub async fn flush(&mut self) -> io::Result<()> {
        self.inner.flush().await
    }

    /// Flush and shut down the transport write half.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.inner.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constants::{DEFAULT_MAX_FRAME_SIZE, PREFACE};
    use crate::transport::{FrameError, StreamId};
    use bytes::Bytes;

    #[tokio::test]
    async fn test_write_then_read_frames() {
        let (a, b) = tokio::io::duplex(64);
        let mut writer = FrameWriter::new(a);
        let mut reader = FrameReader::new(b, DEFAULT_MAX_FRAME_SIZE);

        let payload = Bytes::from(vec![7u8; 1000]);
        let sent = vec![
            Frame::OpenStream {
                stream_id: StreamId::new(1),
            },
            Frame::Data {
                stream_id: StreamId::new(1),
                payload: payload.clone(),
            },
            Frame::FinWrite {
                stream_id: StreamId::new(1),
            },
        ];

        let task = tokio::spawn(async move {
            for frame in &sent {
                writer.write_frame(frame).await.unwrap();
            }
            writer.shutdown().await.unwrap();
            sent
        });

        let mut received = Vec::new();
        while let Some(frame) = reader.read_frame().await.unwrap() {
            received.push(frame);
        }
        assert_eq!(received, task.await.unwrap());
    }

    #[tokio::test]
    async fn test_eof_inside_frame() {
        let (mut a, b) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(b, DEFAULT_MAX_FRAME_SIZE);

        a.write_all(&[0x02, 0x00, 0, 0, 0, 1]).await.unwrap();
        drop(a);

        let err = reader.read_frame().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::PEER_EOF);
    }

    #[tokio::test]
    async fn test_oversize_frame_is_malformed() {
        let (mut a, b) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(b, 1024);

        a.write_all(&hex::decode("02000000000100100000").unwrap())
            .await
            .unwrap();

        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(
            err,
            MuxError::MalformedFrame(FrameError::TooLarge { .. })
        ));
        assert_eq!(err.code(), ErrorCode::FRAME_SIZE_ERROR);
    }

    #[tokio::test]
    async fn test_preface() {
        let (a, b) = tokio::io::duplex(64);
        let mut writer = FrameWriter::new(a);
        let mut reader = FrameReader::new(b, DEFAULT_MAX_FRAME_SIZE);

        writer.write_raw(PREFACE).await.unwrap();
        writer
            .write_frame(&Frame::OpenStream {
                stream_id: StreamId::new(1),
            })
            .await
            .unwrap();
        writer.flush().await.unwrap();

        reader.read_preface(PREFACE).await.unwrap();
        let frame = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(frame.stream_id(), StreamId::new(1));

        let (mut c, d) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(d, DEFAULT_MAX_FRAME_SIZE);
        c.write_all(b"HTTP/1.1").await.unwrap();
        let err = reader.read_preface(PREFACE).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::PROTOCOL_ERROR);
    }
}
