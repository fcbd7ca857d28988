//! The broker boundary: [`BrokerDriver`] is the only thing a transport has
//! to implement to carry this crate's RPC traffic. [`InProcessBroker`] is a
//! complete, dependency-free implementation used by tests and by the
//! logger-manager binary: same shape as a real broker binding, no
//! external moving parts.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::error::{NetError, NetResult};

/// A fully framed wire message (header + body, already concatenated),
/// shared so publishing to N local subscribers never copies it N times.
pub type WireMessage = Arc<Vec<u8>>;

/// Anything that can move [`WireMessage`]s between [`crate::SignalSlotable`]
/// instances. No ordering is guaranteed across distinct topics; within one
/// topic, delivery order matches publish order.
#[async_trait]
pub trait BrokerDriver: Send + Sync {
    async fn publish(&self, topic: &str, message: WireMessage) -> NetResult<()>;

    async fn subscribe(&self, topic: &str) -> NetResult<broadcast::Receiver<WireMessage>>;

    async fn unsubscribe(&self, topic: &str) -> NetResult<()>;

    /// Register a callback for asynchronous transport errors (connection
    /// loss, broker-side nacks) that can't be surfaced through a single
    /// `publish`/`subscribe` call's return value.
    fn on_error(&self, handler: Arc<dyn Fn(NetError) + Send + Sync>);
}

/// A broker with no network underneath it: one `tokio::sync::broadcast`
/// channel per topic, shared within the process. Suitable for tests, for
/// the logger-manager binary's default configuration, and as the
/// reference implementation any real transport should behave like.
pub struct InProcessBroker {
    topics: DashMap<String, broadcast::Sender<WireMessage>>,
    capacity: usize,
    error_handler: RwLock<Option<Arc<dyn Fn(NetError) + Send + Sync>>>,
}

impl InProcessBroker {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { topics: DashMap::new(), capacity, error_handler: RwLock::new(None) }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<WireMessage> {
        self.topics.entry(topic.to_string()).or_insert_with(|| broadcast::channel(self.capacity).0).clone()
    }
}

impl Default for InProcessBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerDriver for InProcessBroker {
    async fn publish(&self, topic: &str, message: WireMessage) -> NetResult<()> {
        // A send with zero live receivers is not an error here -- unlike a
        // real broker, there's nothing to durably queue for.
        let _ = self.sender(topic).send(message);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> NetResult<broadcast::Receiver<WireMessage>> {
        Ok(self.sender(topic).subscribe())
    }

    async fn unsubscribe(&self, topic: &str) -> NetResult<()> {
        // Dropping the last Receiver is what actually tears a subscription
        // down; an empty sender with no receivers is harmless to keep
        // around, so there's nothing further to do here.
        if self.sender(topic).receiver_count() == 0 {
            self.topics.remove(topic);
        }
        Ok(())
    }

    fn on_error(&self, handler: Arc<dyn Fn(NetError) + Send + Sync>) {
        *self.error_handler.write().unwrap() = Some(handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_subscribe_roundtrip() {
        let broker = InProcessBroker::new();
        let mut rx = broker.subscribe("topic.a").await.unwrap();
        broker.publish("topic.a", Arc::new(vec![1, 2, 3])).await.unwrap();
        let msg = rx.recv().await.unwrap();
        assert_eq!(*msg, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn topics_are_independent() {
        let broker = InProcessBroker::new();
        let mut rx_a = broker.subscribe("a").await.unwrap();
        let _rx_b = broker.subscribe("b").await.unwrap();
        broker.publish("b", Arc::new(vec![9])).await.unwrap();
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_is_not_an_error() {
        let broker = InProcessBroker::new();
        assert!(broker.publish("nobody.listening", Arc::new(vec![])).await.is_ok());
    }
}
