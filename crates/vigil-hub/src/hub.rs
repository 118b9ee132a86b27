//! Subscriber registry and best-effort broadcast.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};
use uuid::Uuid;
use vigil_types::{Envelope, EventKind};

use crate::error::HubResult;

/// Default per-subscriber outbound buffer, in envelopes.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

/// Opaque handle identifying one live subscriber.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a subscriber: `Connected → Disconnected (removed)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriberState {
    Connected,
    Disconnected,
}

/// Receiving half handed to the transport that owns the connection.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriberId,
    /// Serialized envelopes, in broadcast order.
    pub receiver: mpsc::Receiver<Arc<str>>,
}

/// Outcome of one broadcast pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// Subscribers disconnected during this pass.
    pub dropped: usize,
}

/// Read-only view of a registered subscriber.
#[derive(Clone, Debug, Serialize)]
pub struct SubscriberInfo {
    pub id: SubscriberId,
    pub state: SubscriberState,
    pub connected_at: DateTime<Utc>,
}

struct SubscriberEntry {
    sender: mpsc::Sender<Arc<str>>,
    state: SubscriberState,
    connected_at: DateTime<Utc>,
}

/// Registry of live subscribers.
///
/// Sends never block: delivery uses `try_send` on a bounded channel, and any
/// subscriber that cannot accept an envelope is disconnected. No history is
/// kept, so a subscriber only sees events broadcast after it registered.
pub struct BroadcastHub {
    subscribers: DashMap<SubscriberId, SubscriberEntry>,
    buffer: usize,
}

impl BroadcastHub {
    /// Create a hub whose subscribers each buffer up to `buffer` envelopes.
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            buffer: buffer.max(1),
        }
    }

    /// Add a subscriber to the live set.
    pub fn register(&self) -> Subscription {
        let id = SubscriberId::generate();
        let (sender, receiver) = mpsc::channel(self.buffer);
        self.subscribers.insert(
            id,
            SubscriberEntry {
                sender,
                state: SubscriberState::Connected,
                connected_at: Utc::now(),
            },
        );
        info!(subscriber = %id, total = self.subscribers.len(), "Subscriber registered");
        Subscription { id, receiver }
    }

    /// Remove a subscriber. Returns `false` if it was already gone.
    ///
    /// Dropping the registry entry drops the sender, so the subscriber's
    /// receiver drains whatever is buffered and then ends.
    pub fn unregister(&self, id: &SubscriberId) -> bool {
        let removed = self.subscribers.remove(id).is_some();
        if removed {
            info!(subscriber = %id, total = self.subscribers.len(), "Subscriber unregistered");
        }
        removed
    }

    /// Deliver an envelope to every registered subscriber.
    pub fn broadcast(&self, envelope: &Envelope) -> HubResult<BroadcastReport> {
        let text: Arc<str> = Arc::from(serde_json::to_string(envelope)?);
        Ok(self.fan_out(text))
    }

    /// Wrap `payload` in an envelope of the given kind and broadcast it.
    pub fn broadcast_event<T: Serialize>(
        &self,
        kind: EventKind,
        payload: &T,
    ) -> HubResult<BroadcastReport> {
        let envelope = Envelope::from_payload(kind, payload)?;
        self.broadcast(&envelope)
    }

    fn fan_out(&self, text: Arc<str>) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        if self.subscribers.is_empty() {
            return report;
        }

        // Removal is deferred: mutating the map while iterating it would
        // deadlock on the shard lock.
        let mut failed = Vec::new();
        for entry in self.subscribers.iter() {
            match entry.sender.try_send(Arc::clone(&text)) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(subscriber = %entry.key(), "Subscriber buffer full, disconnecting");
                    failed.push(*entry.key());
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(subscriber = %entry.key(), "Subscriber channel closed");
                    failed.push(*entry.key());
                }
            }
        }

        for id in failed {
            if let Some(mut entry) = self.subscribers.get_mut(&id) {
                entry.state = SubscriberState::Disconnected;
            }
            if self
                .subscribers
                .remove_if(&id, |_, e| e.state == SubscriberState::Disconnected)
                .is_some()
            {
                report.dropped += 1;
            }
        }

        report
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Current state of a subscriber. Unknown ids report `Disconnected`.
    pub fn state(&self, id: &SubscriberId) -> SubscriberState {
        self.subscribers
            .get(id)
            .map(|e| e.state)
            .unwrap_or(SubscriberState::Disconnected)
    }

    pub fn subscribers(&self) -> Vec<SubscriberInfo> {
        self.subscribers
            .iter()
            .map(|e| SubscriberInfo {
                id: *e.key(),
                state: e.state,
                connected_at: e.connected_at,
            })
            .collect()
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn alert() -> Envelope {
        Envelope::new(EventKind::Alert, json!({"device_id": "dev-1", "z_score": 4.2}))
    }

    #[tokio::test]
    async fn delivers_to_all_subscribers() {
        let hub = BroadcastHub::new(8);
        let mut a = hub.register();
        let mut b = hub.register();

        let report = hub.broadcast(&alert()).unwrap();
        assert_eq!(report, BroadcastReport { delivered: 2, dropped: 0 });

        for sub in [&mut a, &mut b] {
            let text = sub.receiver.recv().await.unwrap();
            let v: serde_json::Value = serde_json::from_str(&text).unwrap();
            assert_eq!(v["type"], "alert");
            assert_eq!(v["data"]["device_id"], "dev-1");
        }
    }

    #[test]
    fn broadcast_with_no_subscribers_is_noop() {
        let hub = BroadcastHub::default();
        let report = hub.broadcast(&alert()).unwrap();
        assert_eq!(report, BroadcastReport::default());
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn full_subscriber_is_dropped() {
        let hub = BroadcastHub::new(1);
        let slow = hub.register();
        let _fast = hub.register();

        hub.broadcast(&alert()).unwrap();
        // slow never reads; its single slot is now taken.
        let report = hub.broadcast(&alert()).unwrap();
        assert_eq!(report.dropped, 2);
        assert_eq!(hub.state(&slow.id), SubscriberState::Disconnected);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn slow_subscriber_does_not_affect_others() {
        let hub = BroadcastHub::new(1);
        let _slow = hub.register();
        let mut fast = hub.register();

        hub.broadcast(&alert()).unwrap();
        fast.receiver.recv().await.unwrap();

        let report = hub.broadcast(&alert()).unwrap();
        assert_eq!(report, BroadcastReport { delivered: 1, dropped: 1 });
        assert_eq!(hub.state(&fast.id), SubscriberState::Connected);
        assert!(fast.receiver.recv().await.is_some());
    }

    #[test]
    fn closed_subscriber_is_dropped() {
        let hub = BroadcastHub::new(4);
        let sub = hub.register();
        let id = sub.id;
        drop(sub);

        let report = hub.broadcast(&alert()).unwrap();
        assert_eq!(report, BroadcastReport { delivered: 0, dropped: 1 });
        assert_eq!(hub.state(&id), SubscriberState::Disconnected);
    }

    #[tokio::test]
    async fn unregistered_subscriber_receives_nothing_more() {
        let hub = BroadcastHub::new(4);
        let mut sub = hub.register();
        assert!(hub.unregister(&sub.id));
        assert!(!hub.unregister(&sub.id));

        hub.broadcast(&alert()).unwrap();
        assert!(sub.receiver.recv().await.is_none());
    }

    #[tokio::test]
    async fn late_subscriber_gets_no_history() {
        let hub = BroadcastHub::new(4);
        hub.broadcast(&alert()).unwrap();

        let mut late = hub.register();
        assert!(late.receiver.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn unregister_during_broadcast_is_safe() {
        let hub = Arc::new(BroadcastHub::new(1024));
        let subs: Vec<_> = (0..32).map(|_| hub.register()).collect();
        let ids: Vec<_> = subs.iter().map(|s| s.id).collect();

        let broadcaster = {
            let hub = Arc::clone(&hub);
            tokio::spawn(async move {
                for _ in 0..200 {
                    hub.broadcast(&alert()).unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };
        let remover = {
            let hub = Arc::clone(&hub);
            tokio::spawn(async move {
                for id in &ids {
                    hub.unregister(id);
                    tokio::task::yield_now().await;
                }
            })
        };

        broadcaster.await.unwrap();
        remover.await.unwrap();
        assert_eq!(hub.subscriber_count(), 0);

        // Every receiver terminates: nothing is delivered after removal.
        for mut sub in subs {
            while sub.receiver.recv().await.is_some() {}
        }
    }

    #[test]
    fn broadcast_event_wraps_payload() {
        let hub = BroadcastHub::new(2);
        let mut sub = hub.register();
        hub.broadcast_event(EventKind::Metric, &json!({"count": 3})).unwrap();

        let text = sub.receiver.try_recv().unwrap();
        let v: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["type"], "metric");
        assert_eq!(v["data"]["count"], 3);
    }

    #[test]
    fn subscribers_listing() {
        let hub = BroadcastHub::default();
        let sub = hub.register();
        let listed = hub.subscribers();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, sub.id);
        assert_eq!(listed[0].state, SubscriberState::Connected);
    }
}
