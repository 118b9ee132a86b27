//! In-memory sink and publisher implementation

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use vigil_types::{AggregateRecord, AlertRecord};

use crate::error::{SinkError, SinkResult};
use crate::traits::{AggregateSink, AlertSink, DeviceSink, Publisher};

/// Aggregate rows and alerts an [`InMemorySink`] keeps by default.
pub const DEFAULT_RETENTION: usize = 10_000;

/// In-memory sink for development and testing
///
/// Keeps at most `retention` aggregate rows and `retention` alerts; the
/// oldest entries are evicted first.
#[derive(Debug)]
pub struct InMemorySink {
    aggregates: Arc<RwLock<VecDeque<AggregateRecord>>>,
    alerts: Arc<RwLock<VecDeque<(i64, AlertRecord)>>>,
    devices: Arc<RwLock<HashMap<String, DateTime<Utc>>>>,
    next_alert_id: AtomicI64,
    fail_writes: AtomicBool,
    retention: usize,
}

impl Default for InMemorySink {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink keeping at most `retention` rows and alerts (minimum 1).
    pub fn with_retention(retention: usize) -> Self {
        Self {
            aggregates: Arc::new(RwLock::new(VecDeque::new())),
            alerts: Arc::new(RwLock::new(VecDeque::new())),
            devices: Arc::new(RwLock::new(HashMap::new())),
            next_alert_id: AtomicI64::new(0),
            fail_writes: AtomicBool::new(false),
            retention: retention.max(1),
        }
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    /// Make every subsequent write fail with [`SinkError::Unavailable`].
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_available(&self) -> SinkResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SinkError::Unavailable("in-memory sink set to fail".into()));
        }
        Ok(())
    }

    pub async fn aggregates(&self) -> Vec<AggregateRecord> {
        self.aggregates.read().await.iter().cloned().collect()
    }

    pub async fn alerts(&self) -> Vec<AlertRecord> {
        self.alerts
            .read()
            .await
            .iter()
            .map(|(_, alert)| alert.clone())
            .collect()
    }

    pub async fn device_last_seen(&self, device_id: &str) -> Option<DateTime<Utc>> {
        self.devices.read().await.get(device_id).copied()
    }

    pub async fn device_count(&self) -> usize {
        self.devices.read().await.len()
    }
}

#[async_trait]
impl AggregateSink for InMemorySink {
    async fn insert_aggregates(&self, records: Vec<AggregateRecord>) -> SinkResult<()> {
        self.check_available()?;
        if records.is_empty() {
            return Ok(());
        }
        let mut aggregates = self.aggregates.write().await;
        aggregates.extend(records);
        let excess = aggregates.len().saturating_sub(self.retention);
        aggregates.drain(..excess);
        Ok(())
    }
}

#[async_trait]
impl AlertSink for InMemorySink {
    async fn insert_alert(&self, alert: AlertRecord) -> SinkResult<i64> {
        self.check_available()?;
        let id = self.next_alert_id.fetch_add(1, Ordering::SeqCst) + 1;
        let mut alerts = self.alerts.write().await;
        alerts.push_back((id, alert));
        if alerts.len() > self.retention {
            alerts.pop_front();
        }
        Ok(id)
    }
}

#[async_trait]
impl DeviceSink for InMemorySink {
    async fn touch_device(&self, device_id: &str) -> SinkResult<()> {
        self.check_available()?;
        self.devices
            .write()
            .await
            .insert(device_id.to_string(), Utc::now());
        Ok(())
    }
}

/// A message captured by [`InMemoryPublisher`].
#[derive(Clone, Debug, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
}

impl PublishedMessage {
    /// Decode the payload as JSON.
    pub fn json(&self) -> SinkResult<serde_json::Value> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// In-memory publisher recording every message sent to its topic
#[derive(Debug)]
pub struct InMemoryPublisher {
    topic: String,
    messages: Arc<RwLock<Vec<PublishedMessage>>>,
    fail_publishes: AtomicBool,
}

impl InMemoryPublisher {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            messages: Arc::new(RwLock::new(Vec::new())),
            fail_publishes: AtomicBool::new(false),
        }
    }

    /// Make every subsequent publish fail.
    pub fn set_fail_publishes(&self, fail: bool) {
        self.fail_publishes.store(fail, Ordering::SeqCst);
    }

    pub async fn messages(&self) -> Vec<PublishedMessage> {
        self.messages.read().await.clone()
    }
}

#[async_trait]
impl Publisher for InMemoryPublisher {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn publish(&self, key: &str, payload: Vec<u8>) -> SinkResult<()> {
        if self.fail_publishes.load(Ordering::SeqCst) {
            return Err(SinkError::Publish {
                topic: self.topic.clone(),
                reason: "in-memory publisher set to fail".into(),
            });
        }
        self.messages.write().await.push(PublishedMessage {
            topic: self.topic.clone(),
            key: key.to_string(),
            payload,
        });
        Ok(())
    }
}

/// Publisher that logs each message and keeps nothing.
///
/// Stands in for a message log when none is configured.
#[derive(Debug)]
pub struct LoggingPublisher {
    topic: String,
    published: AtomicI64,
}

impl LoggingPublisher {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            published: AtomicI64::new(0),
        }
    }

    /// Messages accepted so far.
    pub fn published(&self) -> i64 {
        self.published.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Publisher for LoggingPublisher {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn publish(&self, key: &str, payload: Vec<u8>) -> SinkResult<()> {
        self.published.fetch_add(1, Ordering::Relaxed);
        debug!(topic = %self.topic, key, bytes = payload.len(), "Discarding published message");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_types::Severity;

    fn aggregate(metric: &str) -> AggregateRecord {
        AggregateRecord {
            device_id: "dev-1".into(),
            timestamp: 10,
            window_start: 0,
            window_end: 60_000,
            metric_name: metric.into(),
            metric_value: 1.5,
            sample_count: 3,
        }
    }

    #[tokio::test]
    async fn stores_aggregates_and_alerts() {
        let sink = InMemorySink::new();
        sink.insert_aggregates(vec![aggregate("temperature"), aggregate("humidity")])
            .await
            .unwrap();
        assert_eq!(sink.aggregates().await.len(), 2);

        let alert = AlertRecord::anomaly("dev-1", 1, "pressure", 9.0, Severity::Low, 3.5, 3.0);
        assert_eq!(sink.insert_alert(alert.clone()).await.unwrap(), 1);
        assert_eq!(sink.insert_alert(alert).await.unwrap(), 2);
        assert_eq!(sink.alerts().await.len(), 2);
    }

    #[tokio::test]
    async fn retention_evicts_oldest_entries() {
        let sink = InMemorySink::with_retention(3);
        for metric in ["a", "b"] {
            sink.insert_aggregates(vec![aggregate(metric)]).await.unwrap();
        }
        sink.insert_aggregates(vec![aggregate("c"), aggregate("d"), aggregate("e")])
            .await
            .unwrap();

        let names: Vec<_> = sink
            .aggregates()
            .await
            .into_iter()
            .map(|r| r.metric_name)
            .collect();
        assert_eq!(names, vec!["c", "d", "e"]);

        for value in [1.0, 2.0, 3.0, 4.0, 5.0] {
            let alert = AlertRecord::anomaly("dev-1", 1, "pressure", value, Severity::Low, 3.5, 3.0);
            sink.insert_alert(alert).await.unwrap();
        }
        let alerts = sink.alerts().await;
        assert_eq!(alerts.len(), 3);
        assert_eq!(alerts[0].value, 3.0);
        // Ids keep counting past evictions.
        let alert = AlertRecord::anomaly("dev-1", 1, "pressure", 6.0, Severity::Low, 3.5, 3.0);
        assert_eq!(sink.insert_alert(alert).await.unwrap(), 6);
    }

    #[test]
    fn default_retention_is_bounded() {
        assert_eq!(InMemorySink::new().retention(), DEFAULT_RETENTION);
        assert_eq!(InMemorySink::with_retention(0).retention(), 1);
    }

    #[tokio::test]
    async fn touch_device_upserts() {
        let sink = InMemorySink::new();
        sink.touch_device("dev-1").await.unwrap();
        let first = sink.device_last_seen("dev-1").await.unwrap();
        sink.touch_device("dev-1").await.unwrap();
        assert!(sink.device_last_seen("dev-1").await.unwrap() >= first);
        assert_eq!(sink.device_count().await, 1);
    }

    #[tokio::test]
    async fn fail_writes_rejects_everything() {
        let sink = InMemorySink::new();
        sink.set_fail_writes(true);
        assert!(matches!(
            sink.insert_aggregates(vec![aggregate("x")]).await,
            Err(SinkError::Unavailable(_))
        ));
        assert!(sink.touch_device("dev-1").await.is_err());
        assert!(sink.aggregates().await.is_empty());

        sink.set_fail_writes(false);
        sink.insert_aggregates(vec![aggregate("x")]).await.unwrap();
        assert_eq!(sink.aggregates().await.len(), 1);
    }

    #[tokio::test]
    async fn publisher_records_messages() {
        let publisher = InMemoryPublisher::new("alerts");
        publisher.publish("dev-1", br#"{"a":1}"#.to_vec()).await.unwrap();

        let messages = publisher.messages().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].topic, "alerts");
        assert_eq!(messages[0].key, "dev-1");
        assert_eq!(messages[0].json().unwrap()["a"], 1);

        publisher.set_fail_publishes(true);
        let err = publisher.publish("dev-1", Vec::new()).await.unwrap_err();
        assert!(matches!(err, SinkError::Publish { .. }));
        assert_eq!(publisher.messages().await.len(), 1);
    }

    #[tokio::test]
    async fn logging_publisher_counts_and_discards() {
        let publisher = LoggingPublisher::new("aggregates.minute");
        assert_eq!(publisher.topic(), "aggregates.minute");
        publisher.publish("dev-1", vec![1, 2, 3]).await.unwrap();
        publisher.publish("dev-2", Vec::new()).await.unwrap();
        assert_eq!(publisher.published(), 2);
    }
}
