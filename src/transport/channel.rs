//! In-memory connection over tokio channels.

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::mpsc;

use super::{MessageConnection, MessageSink, MessageSource};
use crate::error::{Result, RpcError};

/// One end of an in-memory duplex connection.
pub struct ChannelConnection {
    tx: mpsc::UnboundedSender<Vec<String>>,
    rx: mpsc::UnboundedReceiver<Vec<String>>,
}

impl ChannelConnection {
    pub fn new(
        tx: mpsc::UnboundedSender<Vec<String>>,
        rx: mpsc::UnboundedReceiver<Vec<String>>,
    ) -> Self {
        Self { tx, rx }
    }
}

/// Create two connected ends. Batches sent on one arrive on the other.
pub fn channel_pair() -> (ChannelConnection, ChannelConnection) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();
    (
        ChannelConnection::new(a_tx, a_rx),
        ChannelConnection::new(b_tx, b_rx),
    )
}

impl MessageConnection for ChannelConnection {
    type Sink = ChannelSink;
    type Source = ChannelSource;

    fn split(self) -> (ChannelSink, ChannelSource) {
        (ChannelSink { tx: self.tx }, ChannelSource { rx: self.rx })
    }
}

pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Vec<String>>,
}

impl MessageSink for ChannelSink {
    fn send(&mut self, batch: Vec<String>) -> BoxFuture<'_, Result<()>> {
        let result = self.tx.send(batch).map_err(|_| RpcError::ConnectionClosed);
        futures::future::ready(result).boxed()
    }
}

pub struct ChannelSource {
    rx: mpsc::UnboundedReceiver<Vec<String>>,
}

impl MessageSource for ChannelSource {
    fn recv(&mut self) -> BoxFuture<'_, Result<Option<Vec<String>>>> {
        async move { Ok(self.rx.recv().await) }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_is_crossed() {
        let (a, b) = channel_pair();
        let (mut a_sink, mut a_source) = a.split();
        let (mut b_sink, mut b_source) = b.split();

        a_sink.send(vec!["one".into(), "two".into()]).await.unwrap();
        b_sink.send(vec!["three".into()]).await.unwrap();

        assert_eq!(b_source.recv().await.unwrap(), Some(vec!["one".to_string(), "two".to_string()]));
        assert_eq!(a_source.recv().await.unwrap(), Some(vec!["three".to_string()]));
    }

    #[tokio::test]
    async fn test_closed_peer() {
        let (a, b) = channel_pair();
        let (mut a_sink, mut a_source) = a.split();
        drop(b);

        assert!(matches!(
            a_sink.send(vec!["x".into()]).await,
            Err(RpcError::ConnectionClosed)
        ));
        assert_eq!(a_source.recv().await.unwrap(), None);
    }
}
