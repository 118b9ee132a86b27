//! Sink and publisher trait definitions

use async_trait::async_trait;
use vigil_types::{AggregateRecord, AlertRecord};

use crate::error::SinkResult;

/// Combined persistence trait
#[async_trait]
pub trait Sink: AggregateSink + AlertSink + DeviceSink + Send + Sync {}

impl<T> Sink for T where T: AggregateSink + AlertSink + DeviceSink + Send + Sync {}

/// Storage for flushed window aggregates
#[async_trait]
pub trait AggregateSink: Send + Sync {
    /// Persist the per-metric rows of one or more windows as a single batch
    async fn insert_aggregates(&self, records: Vec<AggregateRecord>) -> SinkResult<()>;
}

/// Storage for raised alerts
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Persist an alert, returning its assigned id
    async fn insert_alert(&self, alert: AlertRecord) -> SinkResult<i64>;
}

/// Device registry
#[async_trait]
pub trait DeviceSink: Send + Sync {
    /// Record that a device was just seen
    async fn touch_device(&self, device_id: &str) -> SinkResult<()>;
}

/// Producer bound to a single downstream topic
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Topic this publisher writes to
    fn topic(&self) -> &str;

    /// Publish one message keyed by `key`
    async fn publish(&self, key: &str, payload: Vec<u8>) -> SinkResult<()>;
}
