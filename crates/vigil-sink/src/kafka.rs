//! Kafka publisher

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use tracing::{debug, info};

use crate::error::{SinkError, SinkResult};
use crate::traits::Publisher;

const MESSAGE_TIMEOUT_MS: &str = "5000";
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Publisher writing to one Kafka topic, keyed by device id
pub struct KafkaPublisher {
    producer: FutureProducer,
    topic: String,
}

impl KafkaPublisher {
    pub fn new(brokers: &str, topic: impl Into<String>) -> SinkResult<Self> {
        let topic = topic.into();
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", MESSAGE_TIMEOUT_MS)
            .create()
            .map_err(|e| SinkError::Connection(e.to_string()))?;

        info!(brokers, topic = %topic, "Kafka publisher created");
        Ok(Self { producer, topic })
    }
}

#[async_trait]
impl Publisher for KafkaPublisher {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn publish(&self, key: &str, payload: Vec<u8>) -> SinkResult<()> {
        let record = FutureRecord::to(&self.topic).key(key).payload(&payload);
        match self.producer.send(record, Timeout::After(SEND_TIMEOUT)).await {
            Ok((partition, offset)) => {
                debug!(topic = %self.topic, partition, offset, "Message delivered");
                Ok(())
            }
            Err((e, _)) => Err(SinkError::Publish {
                topic: self.topic.clone(),
                reason: e.to_string(),
            }),
        }
    }
}
