//! Outbound batching.
//!
//! Messages produced during one burst of work are coalesced into a single
//! batch and handed to the transport in production order.
//!
//! # Architecture
//!
//! ```text
//! remote calls ─┐
//! replies      ─┼─► Mutex<VecDeque<String>> ─► Flush Task ─► MessageSink
//! cancels      ─┘         (Notify on first)
//! ```
//!
//! Only the send that finds the queue empty wakes the flush task. The task
//! then waits for the queue to settle: it flushes once no message has been
//! queued for [`SETTLE_TURNS`] consecutive scheduler turns and
//! [`SETTLE_WINDOW`], so a burst of sends from another worker thread still
//! leaves as one batch.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, trace};

use crate::error::{Result, RpcError};
use crate::transport::{MessageSink, MessageSource};

/// Default maximum number of messages per flushed batch.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 1024;

/// Quiet scheduler turns the flush task waits for before writing.
pub const SETTLE_TURNS: usize = 3;

/// Minimum quiet time before writing.
pub const SETTLE_WINDOW: Duration = Duration::from_micros(50);

struct Outbox {
    queue: Mutex<VecDeque<String>>,
    /// Total messages ever queued; moves on every send.
    enqueued: AtomicU64,
    /// Queued or in a batch being written.
    pending: AtomicUsize,
    closed: AtomicBool,
    detached: AtomicBool,
    data_to_send: Notify,
}

impl Outbox {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            enqueued: AtomicU64::new(0),
            pending: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            detached: AtomicBool::new(false),
            data_to_send: Notify::new(),
        }
    }

    fn push(&self, message: String) -> Result<()> {
        let first_unsent = {
            let mut queue = self.queue.lock();
            if self.closed.load(Ordering::Acquire) {
                return Err(RpcError::ConnectionClosed);
            }
            let first_unsent = queue.is_empty();
            queue.push_back(message);
            self.pending.fetch_add(1, Ordering::AcqRel);
            self.enqueued.fetch_add(1, Ordering::AcqRel);
            first_unsent
        };

        if first_unsent {
            self.data_to_send.notify_one();
        }
        Ok(())
    }

    /// Wait until no message has been queued for [`SETTLE_TURNS`] turns
    /// spanning at least [`SETTLE_WINDOW`].
    async fn settle(&self) {
        let mut seen = self.enqueued.load(Ordering::Acquire);
        let mut quiet_since = Instant::now();
        let mut quiet = 0;
        loop {
            tokio::task::yield_now().await;
            let now = self.enqueued.load(Ordering::Acquire);
            if now != seen {
                seen = now;
                quiet = 0;
                quiet_since = Instant::now();
                continue;
            }
            quiet += 1;
            if quiet >= SETTLE_TURNS && quiet_since.elapsed() >= SETTLE_WINDOW {
                return;
            }
        }
    }

    fn take_all(&self) -> Vec<String> {
        self.queue.lock().drain(..).collect()
    }

    fn close(&self) {
        let mut queue = self.queue.lock();
        self.closed.store(true, Ordering::Release);
        queue.clear();
        self.pending.store(0, Ordering::Release);
    }
}

/// Last-handle marker: when every [`Multiplexer`] clone is gone, the flush
/// task drains what is left and exits.
struct Producer {
    outbox: Arc<Outbox>,
}

impl Drop for Producer {
    fn drop(&mut self) {
        self.outbox.detached.store(true, Ordering::Release);
        self.outbox.data_to_send.notify_one();
    }
}

/// Handle for queueing outbound messages.
///
/// Cheaply cloneable.
#[derive(Clone)]
pub struct Multiplexer {
    producer: Arc<Producer>,
}

impl Multiplexer {
    /// Spawn the flush task over `sink`.
    ///
    /// When `announce` is set, it is queued ahead of every other message so
    /// it goes out in the first batch.
    pub fn spawn<S>(
        sink: S,
        max_batch_size: usize,
        announce: Option<String>,
    ) -> (Self, JoinHandle<Result<()>>)
    where
        S: MessageSink,
    {
        let outbox = Arc::new(Outbox::new());
        if let Some(message) = announce {
            // A fresh outbox is never closed.
            let _ = outbox.push(message);
        }

        let task = tokio::spawn(flush_loop(outbox.clone(), sink, max_batch_size.max(1)));
        let multiplexer = Self {
            producer: Arc::new(Producer { outbox }),
        };
        (multiplexer, task)
    }

    /// Queue one message. It is delivered with the next flush.
    pub fn send(&self, message: String) -> Result<()> {
        self.producer.outbox.push(message)
    }

    /// Messages queued but not yet handed to the transport.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.producer.outbox.pending.load(Ordering::Acquire)
    }

    /// True once the flush task has stopped.
    pub fn is_closed(&self) -> bool {
        self.producer.outbox.closed.load(Ordering::Acquire)
    }
}

async fn flush_loop<S>(outbox: Arc<Outbox>, mut sink: S, max_batch_size: usize) -> Result<()>
where
    S: MessageSink,
{
    let result = flush_until_detached(&outbox, &mut sink, max_batch_size).await;
    outbox.close();
    result
}

async fn flush_until_detached<S>(
    outbox: &Outbox,
    sink: &mut S,
    max_batch_size: usize,
) -> Result<()>
where
    S: MessageSink,
{
    loop {
        outbox.data_to_send.notified().await;
        outbox.settle().await;

        let mut messages = outbox.take_all().into_iter().peekable();
        while messages.peek().is_some() {
            let batch: Vec<String> = messages.by_ref().take(max_batch_size).collect();
            let batch_size = batch.len();
            trace!(batch_size, "flushing batch");
            let result = sink.send(batch).await;
            outbox.pending.fetch_sub(batch_size, Ordering::AcqRel);
            if let Err(e) = result {
                error!("Transport write failed: {}", e);
                return Err(e);
            }
        }

        if outbox.detached.load(Ordering::Acquire) && outbox.queue.lock().is_empty() {
            return Ok(());
        }
    }
}

/// Feed every message of every inbound batch to `on_message`, in order.
///
/// Returns when the source reports end of stream or fails.
pub async fn read_loop<R, F>(mut source: R, mut on_message: F) -> Result<()>
where
    R: MessageSource,
    F: FnMut(String),
{
    while let Some(batch) = source.recv().await? {
        trace!(batch_size = batch.len(), "received batch");
        for message in batch {
            on_message(message);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{channel_pair, MessageConnection};

    #[tokio::test]
    async fn test_same_tick_messages_share_a_batch() {
        let (a, b) = channel_pair();
        let (sink, _) = a.split();
        let (_, mut source) = b.split();
        let (mux, _task) = Multiplexer::spawn(sink, DEFAULT_MAX_BATCH_SIZE, None);

        mux.send("m1".into()).unwrap();
        mux.send("m2".into()).unwrap();
        mux.send("m3".into()).unwrap();

        let batch = source.recv().await.unwrap().unwrap();
        assert_eq!(batch, vec!["m1", "m2", "m3"]);
    }

    #[tokio::test]
    async fn test_announcement_goes_first() {
        let (a, b) = channel_pair();
        let (sink, _) = a.split();
        let (_, mut source) = b.split();
        let (mux, _task) = Multiplexer::spawn(sink, DEFAULT_MAX_BATCH_SIZE, Some("hello".into()));

        mux.send("m1".into()).unwrap();

        let batch = source.recv().await.unwrap().unwrap();
        assert_eq!(batch, vec!["hello", "m1"]);
    }

    #[tokio::test]
    async fn test_batch_size_limit_keeps_order() {
        let (a, b) = channel_pair();
        let (sink, _) = a.split();
        let (_, mut source) = b.split();
        let (mux, _task) = Multiplexer::spawn(sink, 2, None);

        for i in 0..5 {
            mux.send(format!("m{}", i)).unwrap();
        }

        let mut seen = Vec::new();
        while seen.len() < 5 {
            let batch = source.recv().await.unwrap().unwrap();
            assert!(batch.len() <= 2);
            seen.extend(batch);
        }
        assert_eq!(seen, vec!["m0", "m1", "m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn test_later_tick_gets_new_batch() {
        let (a, b) = channel_pair();
        let (sink, _) = a.split();
        let (_, mut source) = b.split();
        let (mux, _task) = Multiplexer::spawn(sink, DEFAULT_MAX_BATCH_SIZE, None);

        mux.send("first".into()).unwrap();
        assert_eq!(source.recv().await.unwrap().unwrap(), vec!["first"]);

        mux.send("second".into()).unwrap();
        assert_eq!(source.recv().await.unwrap().unwrap(), vec!["second"]);
        assert_eq!(mux.pending_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_burst_on_worker_pool_is_one_batch() {
        let (a, b) = channel_pair();
        let (sink, _) = a.split();
        let (_, mut source) = b.split();
        let (mux, _task) = Multiplexer::spawn(sink, DEFAULT_MAX_BATCH_SIZE, None);

        for i in 0..200 {
            mux.send(format!("m{}", i)).unwrap();
        }

        let batch = source.recv().await.unwrap().unwrap();
        assert_eq!(batch.len(), 200);
        assert_eq!(batch[0], "m0");
        assert_eq!(batch[199], "m199");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_bursts_from_spawned_tasks_keep_order() {
        let (a, b) = channel_pair();
        let (sink, _) = a.split();
        let (_, mut source) = b.split();
        let (mux, _task) = Multiplexer::spawn(sink, DEFAULT_MAX_BATCH_SIZE, None);

        let producer = mux.clone();
        tokio::spawn(async move {
            for i in 0..50 {
                producer.send(format!("m{}", i)).unwrap();
            }
        })
        .await
        .unwrap();

        let batch = source.recv().await.unwrap().unwrap();
        let expected: Vec<String> = (0..50).map(|i| format!("m{}", i)).collect();
        assert_eq!(batch, expected);
    }

    #[tokio::test]
    async fn test_dropping_every_handle_flushes_and_stops() {
        let (a, b) = channel_pair();
        let (sink, _) = a.split();
        let (_, mut source) = b.split();
        let (mux, task) = Multiplexer::spawn(sink, DEFAULT_MAX_BATCH_SIZE, None);

        mux.send("last".into()).unwrap();
        drop(mux);

        assert!(task.await.unwrap().is_ok());
        assert_eq!(source.recv().await.unwrap().unwrap(), vec!["last"]);
    }

    #[tokio::test]
    async fn test_closed_transport_stops_task() {
        let (a, b) = channel_pair();
        let (sink, _) = a.split();
        drop(b);
        let (mux, task) = Multiplexer::spawn(sink, DEFAULT_MAX_BATCH_SIZE, None);

        mux.send("lost".into()).unwrap();
        assert!(matches!(task.await.unwrap(), Err(RpcError::ConnectionClosed)));
        assert!(mux.send("after".into()).is_err());
    }

    #[tokio::test]
    async fn test_read_loop_preserves_order() {
        let (a, b) = channel_pair();
        let (mut sink, _) = a.split();
        let (_, source) = b.split();

        sink.send(vec!["1".into(), "2".into()]).await.unwrap();
        sink.send(vec!["3".into()]).await.unwrap();
        drop(sink);

        let mut seen = Vec::new();
        read_loop(source, |m| seen.push(m)).await.unwrap();
        assert_eq!(seen, vec!["1", "2", "3"]);
    }
}
