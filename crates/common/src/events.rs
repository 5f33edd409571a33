use crate::event_bus::{EventBus, EventEnvelope, Topic};
use lazy_static::lazy_static;
use tokio::sync::broadcast;

lazy_static! {
    pub static ref GLOBAL_EVENT_BUS: EventBus<serde_json::Value> = EventBus::new(4096);
}

pub async fn publish(topic: Topic, payload: serde_json::Value) {
    GLOBAL_EVENT_BUS.publish(topic, payload).await;
}

pub async fn subscribe(topic: Topic) -> broadcast::Receiver<EventEnvelope<serde_json::Value>> {
    GLOBAL_EVENT_BUS.subscribe(topic).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn global_bus_publish_subscribe() {
        let mut rx = subscribe(Topic("test.global.plugin")).await;
        publish(
            Topic("test.global.plugin"),
            serde_json::json!({"plugin": "platform/health", "status": "started"}),
        )
        .await;
        let evt = rx.recv().await.expect("receive");
        assert_eq!(evt.payload["plugin"], "platform/health");
        assert_eq!(evt.payload["status"], "started");
    }
}
