//! Transport layer - moves batches of message strings between endpoints.
//!
//! A connection is split into two halves so the writer task and the read
//! loop can own them independently:
//! - [`MessageSink`]: sends one batch at a time
//! - [`MessageSource`]: yields batches until the peer goes away
//!
//! Two connections are provided: an in-memory [`ChannelConnection`] and a
//! length-prefixed [`StreamConnection`] over any async byte stream.

mod channel;
mod frame_buffer;
mod stream;

use futures::future::BoxFuture;

use crate::error::Result;

pub use channel::{channel_pair, ChannelConnection, ChannelSink, ChannelSource};
pub use frame_buffer::{FrameBuffer, DEFAULT_MAX_FRAME_SIZE, LENGTH_PREFIX_SIZE};
pub use stream::{StreamConnection, StreamSink, StreamSource};

/// Outbound half of a connection.
pub trait MessageSink: Send + 'static {
    /// Deliver one batch. Order inside the batch must be preserved.
    fn send(&mut self, batch: Vec<String>) -> BoxFuture<'_, Result<()>>;
}

/// Inbound half of a connection.
pub trait MessageSource: Send + 'static {
    /// Next batch, or `None` once the peer closed the connection.
    fn recv(&mut self) -> BoxFuture<'_, Result<Option<Vec<String>>>>;
}

/// A bidirectional connection that can be split into its halves.
pub trait MessageConnection {
    type Sink: MessageSink;
    type Source: MessageSource;

    fn split(self) -> (Self::Sink, Self::Source);
}
