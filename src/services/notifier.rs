//! Scrobble Notifier
//!
//! Fans accepted scrobbles out to live subscribers (the SSE route registers one
//! per connected client). Delivery is synchronous under a read lock, so a
//! subscriber must hand the scrobble off without waiting.

use crate::models::{Scrobble, ScrobbleEvent};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

pub trait ScrobbleSubscriber: Send + Sync {
    /// Called once per accepted scrobble. Must not block.
    fn execute(&self, scrobble: &Scrobble, username: &str);
}

#[derive(Default)]
pub struct ScrobbleNotifier {
    subscribers: RwLock<HashMap<i64, Arc<dyn ScrobbleSubscriber>>>,
}

impl ScrobbleNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a subscriber under a random id. Collisions are not checked.
    pub async fn register(&self, subscriber: Arc<dyn ScrobbleSubscriber>) -> i64 {
        let id: i64 = rand::random();
        self.subscribers.write().await.insert(id, subscriber);
        debug!(subscriber_id = id, "Registered scrobble subscriber");
        id
    }

    pub async fn unregister(&self, id: i64) {
        if self.subscribers.write().await.remove(&id).is_some() {
            debug!(subscriber_id = id, "Unregistered scrobble subscriber");
        }
    }

    pub async fn notify(&self, scrobble: &Scrobble, username: &str) {
        let subscribers = self.subscribers.read().await;
        for subscriber in subscribers.values() {
            subscriber.execute(scrobble, username);
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}

/// Forwards one user's scrobbles into a bounded channel.
pub struct ChannelSubscriber {
    username: String,
    tx: mpsc::Sender<ScrobbleEvent>,
}

impl ChannelSubscriber {
    pub fn new(username: impl Into<String>, tx: mpsc::Sender<ScrobbleEvent>) -> Self {
        Self {
            username: username.into(),
            tx,
        }
    }
}

impl ScrobbleSubscriber for ChannelSubscriber {
    fn execute(&self, scrobble: &Scrobble, username: &str) {
        if username != self.username {
            return;
        }

        match self.tx.try_send(ScrobbleEvent::from(scrobble)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(username = %self.username, "Subscriber channel full, dropping scrobble event");
            }
            // Receiver gone; the route unregisters us shortly
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::scrobble;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(String, String)>>,
    }

    impl ScrobbleSubscriber for Recorder {
        fn execute(&self, scrobble: &Scrobble, username: &str) {
            self.seen
                .lock()
                .unwrap()
                .push((username.to_string(), scrobble.track_name.clone()));
        }
    }

    #[tokio::test]
    async fn notify_reaches_every_subscriber_once() {
        let notifier = ScrobbleNotifier::new();
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        notifier.register(first.clone()).await;
        notifier.register(second.clone()).await;

        notifier.notify(&scrobble("Teardrop", 1_000), "mente").await;

        assert_eq!(first.seen.lock().unwrap().len(), 1);
        assert_eq!(second.seen.lock().unwrap().len(), 1);
        assert_eq!(first.seen.lock().unwrap()[0], ("mente".to_string(), "Teardrop".to_string()));
    }

    #[tokio::test]
    async fn unregistered_subscriber_receives_nothing() {
        let notifier = ScrobbleNotifier::new();
        let kept = Arc::new(Recorder::default());
        let removed = Arc::new(Recorder::default());
        notifier.register(kept.clone()).await;
        let id = notifier.register(removed.clone()).await;

        notifier.unregister(id).await;
        notifier.notify(&scrobble("Angel", 2_000), "mente").await;

        assert_eq!(notifier.subscriber_count().await, 1);
        assert_eq!(kept.seen.lock().unwrap().len(), 1);
        assert!(removed.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn channel_subscriber_filters_by_username_and_never_blocks() {
        let (tx, mut rx) = mpsc::channel(1);
        let subscriber = ChannelSubscriber::new("mente", tx);

        subscriber.execute(&scrobble("Other User", 1), "someone-else");
        subscriber.execute(&scrobble("Windowlicker", 2), "mente");
        // Channel is full now; this one is dropped instead of blocking
        subscriber.execute(&scrobble("Xtal", 3), "mente");

        let event = rx.recv().await.unwrap();
        assert_eq!(event.track_name, "Windowlicker");
        assert_eq!(event.timestamp, 2);
        assert!(rx.try_recv().is_err());
    }
}
