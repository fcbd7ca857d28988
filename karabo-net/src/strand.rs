//! Serialized execution on top of the shared tokio runtime. A [`Strand`] is
//! a single FIFO worker: whatever is posted to it runs strictly in order,
//! never concurrently with itself, while different strands still run in
//! parallel on the thread pool. [`StrandPool`] hands out one strand per
//! sender id, so messages from a given remote instance are always handled
//! in the order they arrived while unrelated senders don't serialize
//! against each other.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use tokio::sync::mpsc;

/// A single-worker, FIFO execution context. Posting a future queues it;
/// the worker task drains the queue one future at a time, so handlers
/// never need to reason about concurrent re-entry.
pub struct Strand {
    tx: mpsc::UnboundedSender<BoxFuture<'static, ()>>,
}

impl Strand {
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<BoxFuture<'static, ()>>();
        tokio::spawn(async move {
            while let Some(fut) = rx.recv().await {
                fut.await;
            }
        });
        Self { tx }
    }

    /// Queue work on this strand. Returns immediately; the future runs
    /// once every previously posted future has completed. Silently
    /// dropped if the worker task has already shut down (process
    /// teardown), matching the "best effort during shutdown" posture
    /// the rest of this crate takes with channel sends.
    pub fn post<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let _ = self.tx.send(Box::pin(fut));
    }
}

impl Default for Strand {
    fn default() -> Self {
        Self::new()
    }
}

/// Lazily-created per-sender strands plus one broadcast strand shared by
/// every signal emission that isn't addressed to a specific sender.
pub struct StrandPool {
    broadcast: Arc<Strand>,
    per_sender: DashMap<String, Arc<Strand>>,
}

impl StrandPool {
    pub fn new() -> Self {
        Self { broadcast: Arc::new(Strand::new()), per_sender: DashMap::new() }
    }

    pub fn broadcast_strand(&self) -> Arc<Strand> {
        self.broadcast.clone()
    }

    /// Get or create the strand dedicated to `sender_id`. Messages from
    /// the same sender always land on the same strand and so are handled
    /// in arrival order; there is no ordering guarantee across senders.
    pub fn strand_for(&self, sender_id: &str) -> Arc<Strand> {
        self.per_sender.entry(sender_id.to_string()).or_insert_with(|| Arc::new(Strand::new())).clone()
    }

    /// Drop a sender's strand once it's known gone (e.g. on `instanceGone`),
    /// so the pool doesn't grow unboundedly over an instance's lifetime of
    /// comings and goings.
    pub fn evict(&self, sender_id: &str) {
        self.per_sender.remove(sender_id);
    }

    pub fn len(&self) -> usize {
        self.per_sender.len()
    }

    pub fn is_empty(&self) -> bool {
        self.per_sender.is_empty()
    }
}

impl Default for StrandPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn strand_runs_posted_work_in_order() {
        let strand = Strand::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        for i in 0..5 {
            let order = order.clone();
            strand.post(async move {
                tokio::time::sleep(Duration::from_millis(1)).await;
                order.lock().unwrap().push(i);
            });
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn pool_reuses_strand_for_same_sender() {
        let pool = StrandPool::new();
        let a = pool.strand_for("deviceA");
        let b = pool.strand_for("deviceA");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn pool_gives_distinct_strands_to_distinct_senders() {
        let pool = StrandPool::new();
        let a = pool.strand_for("deviceA");
        let b = pool.strand_for("deviceB");
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn evict_removes_sender_strand() {
        let pool = StrandPool::new();
        pool.strand_for("deviceA");
        assert_eq!(pool.len(), 1);
        pool.evict("deviceA");
        assert_eq!(pool.len(), 0);
    }

    #[tokio::test]
    async fn independent_senders_do_not_block_each_other() {
        let pool = StrandPool::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let slow = pool.strand_for("slow");
        let fast = pool.strand_for("fast");
        let c = counter.clone();
        slow.post(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            c.fetch_add(1, Ordering::SeqCst);
        });
        let c = counter.clone();
        fast.post(async move {
            c.fetch_add(10, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }
}
