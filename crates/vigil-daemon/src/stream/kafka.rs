//! Kafka telemetry source

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::Message;
use tracing::info;

use super::{SourceRecord, TelemetrySource};
use crate::error::{StreamError, StreamResult};

/// A consumer-group subscription to the raw telemetry topic.
///
/// Offsets are committed automatically; a record that fails downstream is
/// not redelivered.
pub struct KafkaSource {
    consumer: StreamConsumer,
}

impl KafkaSource {
    pub fn new(brokers: &str, topic: &str, group_id: &str) -> StreamResult<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "latest")
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| StreamError::Connection(e.to_string()))?;

        consumer
            .subscribe(&[topic])
            .map_err(|e| StreamError::Connection(e.to_string()))?;

        info!(brokers, topic, group_id, "Kafka consumer subscribed");
        Ok(Self { consumer })
    }
}

#[async_trait]
impl TelemetrySource for KafkaSource {
    async fn next_record(&mut self) -> StreamResult<Option<SourceRecord>> {
        let message = self
            .consumer
            .recv()
            .await
            .map_err(|e| StreamError::Read(e.to_string()))?;

        Ok(Some(SourceRecord {
            partition: message.partition(),
            offset: message.offset(),
            key: message.key().map(<[u8]>::to_vec),
            payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        }))
    }
}
