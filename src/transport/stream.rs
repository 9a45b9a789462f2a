//! Connection over an async byte stream (pipe, socket, duplex).
//!
//! Each batch travels as one frame whose payload is the JSON array of the
//! batch's message strings.
//!
//! # Example
//!
//! ```ignore
//! use plugin_rpc::transport::StreamConnection;
//!
//! let stream = tokio::net::UnixStream::connect(path).await?;
//! let protocol = RpcProtocol::builder().start(StreamConnection::new(stream));
//! ```

use std::collections::VecDeque;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

use super::frame_buffer::{encode_frame, FrameBuffer, DEFAULT_MAX_FRAME_SIZE};
use super::{MessageConnection, MessageSink, MessageSource};
use crate::error::{Result, RpcError};

const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Length-prefixed connection over a bidirectional stream.
pub struct StreamConnection<S> {
    stream: S,
    max_frame_size: u32,
}

impl<S> StreamConnection<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Limit the size of inbound frames.
    pub fn max_frame_size(mut self, max_frame_size: u32) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }
}

impl<S> MessageConnection for StreamConnection<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    type Sink = StreamSink<WriteHalf<S>>;
    type Source = StreamSource<ReadHalf<S>>;

    fn split(self) -> (Self::Sink, Self::Source) {
        let (reader, writer) = tokio::io::split(self.stream);
        (
            StreamSink { writer },
            StreamSource {
                reader,
                buffer: FrameBuffer::with_max_frame_size(self.max_frame_size),
                ready: VecDeque::new(),
                chunk: vec![0; READ_CHUNK_SIZE],
            },
        )
    }
}

pub struct StreamSink<W> {
    writer: W,
}

impl<W> StreamSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W> MessageSink for StreamSink<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    fn send(&mut self, batch: Vec<String>) -> BoxFuture<'_, Result<()>> {
        async move {
            let payload = serde_json::to_vec(&batch)?;
            let frame = encode_frame(&payload)?;
            self.writer.write_all(&frame).await?;
            self.writer.flush().await?;
            Ok(())
        }
        .boxed()
    }
}

pub struct StreamSource<R> {
    reader: R,
    buffer: FrameBuffer,
    /// Frames extracted by an earlier read but not yet returned.
    ready: VecDeque<bytes::Bytes>,
    chunk: Vec<u8>,
}

impl<R> StreamSource<R> {
    pub fn new(reader: R, max_frame_size: u32) -> Self {
        Self {
            reader,
            buffer: FrameBuffer::with_max_frame_size(max_frame_size),
            ready: VecDeque::new(),
            chunk: vec![0; READ_CHUNK_SIZE],
        }
    }
}

impl<R> MessageSource for StreamSource<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    fn recv(&mut self) -> BoxFuture<'_, Result<Option<Vec<String>>>> {
        async move {
            loop {
                if let Some(frame) = self.ready.pop_front() {
                    let batch: Vec<String> = serde_json::from_slice(&frame)?;
                    return Ok(Some(batch));
                }

                let n = self.reader.read(&mut self.chunk).await?;
                if n == 0 {
                    if self.buffer.is_idle() {
                        return Ok(None);
                    }
                    return Err(RpcError::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "stream closed inside a frame",
                    )));
                }
                let frames = self.buffer.push(&self.chunk[..n])?;
                self.ready.extend(frames);
            }
        }
        .boxed()
    }
}
