//! Live push envelopes.
//!
//! Every frame sent to a live subscriber is `{type, timestamp, data}` JSON.

use serde::{Deserialize, Serialize};

use crate::sample::now_millis;

/// Kind of live event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Alert,
    Metric,
    DeviceStatus,
}

/// Frame delivered to live subscribers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Broadcast time in epoch milliseconds.
    pub timestamp: i64,
    pub data: serde_json::Value,
}

impl Envelope {
    /// Wrap an already-serialized payload, stamped with the current time.
    pub fn new(kind: EventKind, data: serde_json::Value) -> Self {
        Self {
            kind,
            timestamp: now_millis(),
            data,
        }
    }

    /// Serialize `payload` and wrap it.
    pub fn from_payload<T: Serialize>(kind: EventKind, payload: &T) -> serde_json::Result<Self> {
        Ok(Self::new(kind, serde_json::to_value(payload)?))
    }
}

/// Device liveness as seen by the detector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatusKind {
    /// Device started reporting (statistics created).
    Active,
    /// Device statistics were purged after inactivity.
    Inactive,
}

/// Payload of a `device_status` event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub device_id: String,
    pub status: DeviceStatusKind,
    /// Last device-side timestamp seen (epoch ms).
    pub last_seen: i64,
}
