//! Vigil daemon library
//!
//! This module provides the runtime around the aggregation and detection
//! engines:
//! - Configuration and logging
//! - Telemetry sources (in-process log, simulated fleet, Kafka)
//! - Consumer loops and the flush/cleanup timers
//! - HTTP, WebSocket and metrics surface
//! - Server lifecycle management

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod server;
pub mod stream;

pub use config::DaemonConfig;
pub use error::{ApiError, DaemonError, DaemonResult, StreamError, StreamResult};
pub use metrics::PipelineMetrics;
pub use pipeline::{ConsumerReport, Pipeline, PipelineSummary, PipelineTasks};
pub use server::Server;
pub use stream::{MemoryLog, SourceRecord, TelemetrySource};
