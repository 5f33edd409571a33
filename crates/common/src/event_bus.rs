use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic(pub &'static str);

#[derive(Debug, Clone)]
pub struct EventEnvelope<T: Clone + Send + Sync + Debug + 'static> {
    pub topic: Topic,
    pub payload: T,
    pub ts_ms: u128,
}

/// In-process publish/subscribe bus, one broadcast channel per topic
#[derive(Clone)]
pub struct EventBus<T: Clone + Send + Sync + Debug + 'static> {
    inner: Arc<RwLock<Inner<T>>>,
    subscribe_buffer: usize,
}

struct Inner<T: Clone + Send + Sync + Debug + 'static> {
    topics: HashMap<&'static str, broadcast::Sender<EventEnvelope<T>>>,
}

impl<T: Clone + Send + Sync + Debug + 'static> Default for EventBus<T> {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl<T: Clone + Send + Sync + Debug + 'static> EventBus<T> {
    pub fn new(subscribe_buffer: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                topics: HashMap::new(),
            })),
            subscribe_buffer,
        }
    }

    async fn sender(&self, topic: &Topic) -> broadcast::Sender<EventEnvelope<T>> {
        if let Some(tx) = self.inner.read().await.topics.get(topic.0) {
            return tx.clone();
        }
        let mut inner = self.inner.write().await;
        inner
            .topics
            .entry(topic.0)
            .or_insert_with(|| {
                info!(target: "event_bus", topic = topic.0, "created topic");
                broadcast::channel(self.subscribe_buffer).0
            })
            .clone()
    }

    /// Publishing never blocks; events without subscribers are dropped.
    pub async fn publish(&self, topic: Topic, payload: T) {
        let tx = self.sender(&topic).await;
        let envelope = EventEnvelope {
            topic: topic.clone(),
            payload,
            ts_ms: current_ts_ms(),
        };
        match tx.send(envelope) {
            Ok(receivers) => {
                debug!(target: "event_bus", topic = topic.0, receivers, "published");
            }
            Err(_) => {
                debug!(target: "event_bus", topic = topic.0, "no subscribers");
            }
        }
    }

    pub async fn subscribe(&self, topic: Topic) -> broadcast::Receiver<EventEnvelope<T>> {
        self.sender(&topic).await.subscribe()
    }
}

fn current_ts_ms() -> u128 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_subscribe_basic() {
        let bus: EventBus<String> = EventBus::new(8);
        let mut rx = bus.subscribe(Topic("test.topic")).await;
        bus.publish(Topic("test.topic"), "hello".to_string()).await;
        let evt = rx.recv().await.expect("should receive");
        assert_eq!(evt.topic.0, "test.topic");
        assert_eq!(evt.payload, "hello".to_string());
    }

    #[tokio::test]
    async fn publish_to_empty_topic_does_not_panic() {
        let bus: EventBus<u64> = EventBus::default();
        bus.publish(Topic("no.subscribers"), 42).await;
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let bus: EventBus<u64> = EventBus::new(4);
        let mut rx_a = bus.subscribe(Topic("a")).await;
        let mut rx_b = bus.subscribe(Topic("b")).await;
        bus.publish(Topic("a"), 1).await;
        assert_eq!(rx_a.recv().await.unwrap().payload, 1);
        assert!(rx_b.try_recv().is_err());
    }
}
