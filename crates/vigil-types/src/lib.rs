//! # vigil-types
//!
//! Shared data model for the Vigil telemetry pipeline.
//!
//! ## Overview
//!
//! ```text
//!   raw bytes ──► decode() ──► TelemetrySample ──┬──► Aggregator ──► AggregateRecord / AggregatePublish
//!                                                └──► Detector   ──► AlertRecord
//!                                                          │
//!                                                          ▼
//!                                                      Envelope  ──► live subscribers
//! ```
//!
//! - [`TelemetrySample`]: an immutable decoded reading from one device
//! - [`decode`]: protobuf / JSON wire decoding with validation
//! - [`AggregateRecord`], [`AggregatePublish`], [`AlertRecord`]: downstream output shapes
//! - [`Envelope`]: the `{type, timestamp, data}` frame pushed to live subscribers

#![deny(unsafe_code)]

pub mod decode;
pub mod envelope;
pub mod error;
pub mod records;
pub mod sample;
pub mod wire;

pub use decode::{decode, encode_json, encode_protobuf, WireFormat};
pub use envelope::{DeviceStatus, DeviceStatusKind, Envelope, EventKind};
pub use error::{DecodeError, DecodeResult};
pub use records::{AggregatePublish, AggregateRecord, AlertRecord, Severity};
pub use sample::{now_millis, window_bounds, TelemetrySample};
pub use wire::Telemetry;
