//! Raw telemetry sources
//!
//! Each consumer owns its own [`TelemetrySource`] and therefore its own
//! cursor into the stream; the aggregator and detector never share one.

mod memory;
mod simulated;

#[cfg(feature = "kafka")]
mod kafka;

pub use memory::{ChannelSource, MemoryLog, DEFAULT_PARTITIONS};
pub use simulated::Simulator;

#[cfg(feature = "kafka")]
pub use kafka::KafkaSource;

use async_trait::async_trait;

use crate::error::StreamResult;

/// One raw record read from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
}

/// A pull-based reader over the raw telemetry topic.
#[async_trait]
pub trait TelemetrySource: Send {
    /// Wait for the next record. `Ok(None)` means the stream has ended.
    async fn next_record(&mut self) -> StreamResult<Option<SourceRecord>>;
}
