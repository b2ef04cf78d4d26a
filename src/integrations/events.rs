use tokio::sync::broadcast;
use tracing::debug;

use crate::models::event::DomainEvent;

/// Hands domain events to the notification collaborator. Implementations
/// must return immediately; delivery happens elsewhere.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: DomainEvent);
}

/// Fans events out to in-process subscribers (websocket clients).
#[derive(Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<DomainEvent>,
}

impl BroadcastSink {
    pub fn new(buffer: usize) -> Self {
        let (tx, _unused_rx) = broadcast::channel(buffer.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastSink {
    fn publish(&self, event: DomainEvent) {
        let name = event.name();
        // No subscribers is not an error.
        if self.tx.send(event).is_err() {
            debug!(event = name, "event published with no subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::{BroadcastSink, EventSink};
    use crate::models::event::DomainEvent;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let sink = BroadcastSink::new(8);
        let mut rx = sink.subscribe();
        let ride_id = Uuid::new_v4();

        sink.publish(DomainEvent::RideOffered {
            ride_id,
            driver_id: Uuid::new_v4(),
            at: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "RideOffered");
    }

    #[test]
    fn publishing_without_subscribers_does_not_block() {
        let sink = BroadcastSink::new(1);
        for _ in 0..10 {
            sink.publish(DomainEvent::RideStarted {
                ride_id: Uuid::new_v4(),
                rider_id: None,
                driver_id: None,
                at: Utc::now(),
            });
        }
    }
}
