//! Bounded handoff between the notification source and the workers.
//!
//! A thin layer over a bounded flume channel: multi-producer,
//! multi-consumer, FIFO per producer. The producer half offers without
//! blocking and counts what a full queue forces it to drop; the consumer
//! half suspends on `take` and observes end-of-stream once every producer
//! is gone and the queue has drained.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::pq::Notification;

/// The queue element. Currently identical to a notification; aliased so
/// the payload can evolve without touching the queue surface.
pub type WorkItem = Notification;

pub fn bounded(capacity: usize) -> (QueueSender, QueueReceiver) {
    let (tx, rx) = flume::bounded(capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    (
        QueueSender {
            tx,
            dropped: Arc::clone(&dropped),
        },
        QueueReceiver { rx, dropped },
    )
}

/// Producer half. Dropping the last sender closes the queue.
pub struct QueueSender {
    tx: flume::Sender<WorkItem>,
    dropped: Arc<AtomicU64>,
}

impl QueueSender {
    /// Non-blocking offer; `false` when the queue refused the item, in
    /// which case the drop counter has been incremented.
    pub fn offer(&self, item: WorkItem) -> bool {
        match self.tx.try_send(item) {
            Ok(()) => true,
            Err(flume::TrySendError::Full(_)) | Err(flume::TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Total items refused so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Consumer half; clone one per worker.
#[derive(Clone)]
pub struct QueueReceiver {
    rx: flume::Receiver<WorkItem>,
    dropped: Arc<AtomicU64>,
}

impl QueueReceiver {
    /// Suspend until an item is available. `None` is the end-of-stream
    /// sentinel: the queue is closed and drained.
    pub async fn take(&self) -> Option<WorkItem> {
        self.rx.recv_async().await.ok()
    }

    /// Total items the producer has refused so far; the counter is shared
    /// with the sender half, so it stays readable after the producer is
    /// gone.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(payload: &str) -> WorkItem {
        Notification {
            channel: "task".to_string(),
            pid: 0,
            payload: payload.to_string(),
        }
    }

    #[tokio::test]
    async fn delivers_in_fifo_order() {
        let (tx, rx) = bounded(4);

        assert!(tx.offer(item("1")));
        assert!(tx.offer(item("2")));
        assert!(tx.offer(item("3")));

        assert_eq!(rx.take().await.unwrap().payload, "1");
        assert_eq!(rx.take().await.unwrap().payload, "2");
        assert_eq!(rx.take().await.unwrap().payload, "3");
    }

    #[tokio::test]
    async fn refuses_offers_beyond_capacity() {
        let (tx, rx) = bounded(2);

        assert!(tx.offer(item("a")));
        assert!(tx.offer(item("b")));
        assert!(!tx.offer(item("c")));
        assert!(!tx.offer(item("d")));
        assert_eq!(tx.dropped(), 2);
        assert_eq!(rx.dropped(), 2);

        // capacity frees up as consumers take
        assert_eq!(rx.take().await.unwrap().payload, "a");
        assert!(tx.offer(item("e")));
        assert_eq!(tx.dropped(), 2);

        // the counter outlives the producer
        drop(tx);
        assert_eq!(rx.dropped(), 2);
    }

    #[tokio::test]
    async fn take_sees_end_of_stream_after_producer_drops() {
        let (tx, rx) = bounded(2);

        assert!(tx.offer(item("last")));
        drop(tx);

        // the queue drains before reporting closure
        assert_eq!(rx.take().await.unwrap().payload, "last");
        assert!(rx.take().await.is_none());
    }

    #[tokio::test]
    async fn receivers_share_the_queue() {
        let (tx, rx) = bounded(2);
        let rx2 = rx.clone();

        assert!(tx.offer(item("only")));
        assert_eq!(rx2.take().await.unwrap().payload, "only");

        drop(tx);
        assert!(rx.take().await.is_none());
        assert!(rx2.take().await.is_none());
    }
}
