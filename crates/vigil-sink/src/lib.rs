//! Persistence and republish boundary.
//!
//! Flushed aggregates and raised alerts leave the pipeline through two
//! seams: a [`Sink`] that stores them and a [`Publisher`] that forwards them
//! to a downstream topic. Both must tolerate concurrent use, since flush
//! and alert paths share one instance of each.
//!
//! Backends:
//! - [`InMemorySink`] / [`InMemoryPublisher`]: development and tests; the sink
//!   keeps a bounded window of recent rows
//! - [`LoggingPublisher`]: discards messages when no message log is configured
//! - [`PostgresSink`]: PostgreSQL, with TimescaleDB hypertables when available
//! - `KafkaPublisher` (feature `kafka`): rdkafka producer

#![deny(unsafe_code)]

pub mod error;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;
pub mod postgres;
pub mod traits;

pub use error::{SinkError, SinkResult};
#[cfg(feature = "kafka")]
pub use kafka::KafkaPublisher;
pub use memory::{
    InMemoryPublisher, InMemorySink, LoggingPublisher, PublishedMessage, DEFAULT_RETENTION,
};
pub use postgres::PostgresSink;
pub use traits::{AggregateSink, AlertSink, DeviceSink, Publisher, Sink};
