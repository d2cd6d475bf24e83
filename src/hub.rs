//! Single-publisher fan-out of admitted events to every live subscription.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::event::Event;

/// Default delivery-channel capacity for a subscription.
pub const DEFAULT_CAPACITY: usize = 5;

/// In-process pub/sub fabric. One task drains the publish channel and
/// delivers to every watcher with a non-blocking send; a watcher whose
/// channel is full is evicted on the spot (drop-slow), observing closure
/// of its receiver. Delivery order per watcher equals publish order.
#[derive(Clone)]
pub struct EventHub {
    publish_tx: mpsc::Sender<Arc<Event>>,
    watchers: Arc<Mutex<HashMap<String, mpsc::Sender<Arc<Event>>>>>,
}

impl EventHub {
    pub fn new() -> Self {
        let (publish_tx, mut publish_rx) = mpsc::channel::<Arc<Event>>(16);
        let watchers: Arc<Mutex<HashMap<String, mpsc::Sender<Arc<Event>>>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let fanout = watchers.clone();
        tokio::spawn(async move {
            while let Some(event) = publish_rx.recv().await {
                let mut map = fanout.lock().expect("hub watcher map poisoned");
                map.retain(|id, tx| match tx.try_send(event.clone()) {
                    Ok(()) => true,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(subscription = %id, "dropping slow subscriber");
                        false
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        debug!(subscription = %id, "removing closed subscriber");
                        false
                    }
                });
            }
        });

        EventHub {
            publish_tx,
            watchers,
        }
    }

    /// Register a delivery channel under `id` with the default capacity.
    /// Registering an id again replaces (and closes) the previous channel.
    pub fn subscribe(&self, id: impl Into<String>) -> mpsc::Receiver<Arc<Event>> {
        self.subscribe_with_capacity(id, DEFAULT_CAPACITY)
    }

    pub fn subscribe_with_capacity(
        &self,
        id: impl Into<String>,
        capacity: usize,
    ) -> mpsc::Receiver<Arc<Event>> {
        let (tx, rx) = mpsc::channel(capacity);
        self.watchers
            .lock()
            .expect("hub watcher map poisoned")
            .insert(id.into(), tx);
        rx
    }

    /// Remove and close the channel registered under `id`.
    pub fn unsubscribe(&self, id: &str) {
        self.watchers
            .lock()
            .expect("hub watcher map poisoned")
            .remove(id);
    }

    /// Hand an event to the fan-out task. Suspends only if the publish
    /// channel itself is full; delivery to watchers never blocks.
    pub async fn publish(&self, event: Arc<Event>) {
        if self.publish_tx.send(event).await.is_err() {
            warn!("event hub fan-out task is gone");
        }
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn event(kind: i64) -> Arc<Event> {
        Arc::new(Event {
            kind,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn delivers_in_publish_order() {
        let hub = EventHub::new();
        let mut rx = hub.subscribe("a");
        for kind in 0..3 {
            hub.publish(event(kind)).await;
        }
        for kind in 0..3 {
            let e = timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(e.kind, kind);
        }
    }

    #[tokio::test]
    async fn slow_subscriber_is_evicted() {
        let hub = EventHub::new();
        let mut slow = hub.subscribe_with_capacity("slow", 1);
        let mut fast = hub.subscribe_with_capacity("fast", 16);

        for kind in 0..4 {
            hub.publish(event(kind)).await;
        }
        // the fast watcher sees everything
        for kind in 0..4 {
            let e = timeout(Duration::from_secs(1), fast.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(e.kind, kind);
        }
        // the slow one got the first event, then its channel was closed
        assert_eq!(slow.recv().await.unwrap().kind, 0);
        assert!(slow.recv().await.is_none());
    }

    #[tokio::test]
    async fn unsubscribe_closes_the_channel() {
        let hub = EventHub::new();
        let mut rx = hub.subscribe("a");
        hub.unsubscribe("a");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn resubscribing_replaces_the_previous_channel() {
        let hub = EventHub::new();
        let mut old = hub.subscribe("a");
        let mut new = hub.subscribe("a");
        hub.publish(event(9)).await;
        assert_eq!(
            timeout(Duration::from_secs(1), new.recv())
                .await
                .unwrap()
                .unwrap()
                .kind,
            9
        );
        assert!(old.recv().await.is_none());
    }
}
