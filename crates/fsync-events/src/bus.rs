// bus.rs — Broadcast fan-out.
//
// tokio::sync::broadcast drops messages for lagging receivers instead of
// blocking the publisher, which is exactly the best-effort contract the
// event channel has. Publishing with zero subscribers is not an error.

use tokio::sync::broadcast;

use crate::envelope::{Envelope, EventKind};

/// Hub-local event broadcaster.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Envelope>,
}

impl EventBus {
    /// `capacity` bounds how far a slow subscriber may lag before it
    /// starts missing events.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(16));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publish one event. Errors (no subscribers) are swallowed.
    pub fn publish(&self, kind: EventKind, data: impl serde::Serialize) {
        let _ = self.tx.send(Envelope::new(kind, data));
    }

    pub fn publish_envelope(&self, envelope: Envelope) {
        let _ = self.tx.send(envelope);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(EventKind::SyncTaskEvent, serde_json::json!({"taskId": 1}));
        let env = rx.recv().await.unwrap();
        assert_eq!(env.kind, EventKind::SyncTaskEvent);
        assert_eq!(env.data["taskId"], 1);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_silent() {
        let bus = EventBus::new(16);
        bus.publish(EventKind::HookTriggered, serde_json::json!({"project": "web"}));
        // Nothing to assert beyond "did not panic / did not error".
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn laggards_drop_oldest_instead_of_blocking() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        for i in 0..64 {
            bus.publish(EventKind::SyncNodeEvent, serde_json::json!({"i": i}));
        }
        // The receiver lagged; the first recv reports the gap.
        let first = rx.recv().await;
        assert!(matches!(
            first,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
        // After the lag notice, fresh events flow again.
        let next = rx.recv().await.unwrap();
        assert_eq!(next.kind, EventKind::SyncNodeEvent);
    }
}
