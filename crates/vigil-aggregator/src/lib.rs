//! # vigil-aggregator
//!
//! Per-device, per-metric running averages over fixed tumbling windows.
//!
//! Samples land in the window their own timestamp maps to. A window stays
//! open until `window_end + grace_period` has passed, so late samples for a
//! just-closed minute are still counted. A periodic flush then hands each
//! closed window to the sink (one row per metric), the aggregates topic
//! (one JSON message per window) and live subscribers, and forgets it.
//!
//! [`WindowTable`] is the lock-free core and takes time as an argument;
//! [`Aggregator`] wraps it in a lock and drives the outputs.

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod service;
pub mod window;

pub use config::AggregatorConfig;
pub use error::{AggregatorError, AggregatorResult};
pub use service::{Aggregator, AggregatorSnapshot, FlushReport};
pub use window::{WindowAggregate, WindowKey, WindowTable};
