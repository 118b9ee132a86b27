//! Telemetry decoder.
//!
//! Turns a raw stream record into a [`TelemetrySample`]. Stateless; every
//! failure is reported as a [`DecodeError`] and the caller decides whether to
//! drop the record.
//!
//! Metric names are taken as sent, empty ones included. A non-finite reading
//! is removed on its own and the rest of the sample is kept.

use std::collections::HashMap;

use prost::Message;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{DecodeError, DecodeResult};
use crate::sample::TelemetrySample;
use crate::wire::Telemetry;

/// Encoding of records on the raw telemetry topic.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// Protobuf `Telemetry` message (the ingestion service's format).
    #[default]
    Protobuf,
    /// `{"device_id", "ts", "metrics", "raw"}` JSON object.
    Json,
}

/// JSON shape of a raw record.
#[derive(Debug, Serialize, Deserialize)]
struct JsonTelemetry {
    device_id: String,
    ts: i64,
    #[serde(default)]
    metrics: HashMap<String, f64>,
    #[serde(default)]
    raw: Option<Vec<u8>>,
}

/// Decode a raw record.
pub fn decode(bytes: &[u8], format: WireFormat) -> DecodeResult<TelemetrySample> {
    let mut sample = match format {
        WireFormat::Protobuf => {
            let msg = Telemetry::decode(bytes)?;
            TelemetrySample {
                device_id: msg.device_id,
                timestamp: msg.ts,
                metrics: msg.metrics,
                raw: if msg.raw.is_empty() { None } else { Some(msg.raw) },
            }
        }
        WireFormat::Json => {
            let msg: JsonTelemetry = serde_json::from_slice(bytes)?;
            TelemetrySample {
                device_id: msg.device_id,
                timestamp: msg.ts,
                metrics: msg.metrics,
                raw: msg.raw,
            }
        }
    };

    if sample.device_id.is_empty() {
        return Err(DecodeError::MissingDeviceId);
    }
    drop_non_finite(&mut sample);
    Ok(sample)
}

fn drop_non_finite(sample: &mut TelemetrySample) {
    let device_id = &sample.device_id;
    sample.metrics.retain(|name, value| {
        if value.is_finite() {
            return true;
        }
        warn!(device_id = %device_id, metric = %name, value = %value, "Dropping non-finite reading");
        false
    });
}

/// Encode a sample as a protobuf `Telemetry` message.
pub fn encode_protobuf(sample: &TelemetrySample) -> Vec<u8> {
    Telemetry {
        device_id: sample.device_id.clone(),
        ts: sample.timestamp,
        metrics: sample.metrics.clone(),
        raw: sample.raw.clone().unwrap_or_default(),
    }
    .encode_to_vec()
}

/// Encode a sample as a JSON raw record.
pub fn encode_json(sample: &TelemetrySample) -> DecodeResult<Vec<u8>> {
    let msg = JsonTelemetry {
        device_id: sample.device_id.clone(),
        ts: sample.timestamp,
        metrics: sample.metrics.clone(),
        raw: sample.raw.clone(),
    };
    Ok(serde_json::to_vec(&msg)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TelemetrySample {
        TelemetrySample::new("sensor-7", 1_700_000_000_000)
            .with_metric("temperature", 23.5)
            .with_metric("humidity", 45.2)
    }

    #[test]
    fn protobuf_decodes_ingest_format() {
        let bytes = encode_protobuf(&sample());
        let decoded = decode(&bytes, WireFormat::Protobuf).unwrap();
        assert_eq!(decoded, sample());
    }

    #[test]
    fn json_decodes_without_raw() {
        let json = br#"{"device_id":"sensor-7","ts":5,"metrics":{"pressure":1013.0}}"#;
        let decoded = decode(json, WireFormat::Json).unwrap();
        assert_eq!(decoded.device_id, "sensor-7");
        assert_eq!(decoded.timestamp, 5);
        assert_eq!(decoded.metrics["pressure"], 1013.0);
        assert!(decoded.raw.is_none());
    }

    #[test]
    fn empty_raw_bytes_become_none() {
        let mut s = sample();
        s.raw = Some(Vec::new());
        let decoded = decode(&encode_protobuf(&s), WireFormat::Protobuf).unwrap();
        assert!(decoded.raw.is_none());
    }

    #[test]
    fn garbage_is_rejected() {
        let err = decode(&[0xff, 0xff, 0xff], WireFormat::Protobuf).unwrap_err();
        assert!(matches!(err, DecodeError::Protobuf(_)));

        let err = decode(b"not json", WireFormat::Json).unwrap_err();
        assert!(matches!(err, DecodeError::Json(_)));
    }

    #[test]
    fn empty_device_id_is_rejected() {
        let s = TelemetrySample::new("", 1).with_metric("x", 1.0);
        let err = decode(&encode_protobuf(&s), WireFormat::Protobuf).unwrap_err();
        assert!(matches!(err, DecodeError::MissingDeviceId));
    }

    #[test]
    fn empty_metric_name_is_an_ordinary_key() {
        let json = br#"{"device_id":"d","ts":1,"metrics":{"":1.0,"temperature":20.0}}"#;
        let decoded = decode(json, WireFormat::Json).unwrap();
        assert_eq!(decoded.metrics.len(), 2);
        assert_eq!(decoded.metrics[""], 1.0);
        assert_eq!(decoded.metrics["temperature"], 20.0);
    }

    #[test]
    fn non_finite_reading_is_dropped_alone() {
        let s = TelemetrySample::new("d", 1)
            .with_metric("temperature", f64::INFINITY)
            .with_metric("pressure", f64::NAN)
            .with_metric("humidity", 40.0);
        let decoded = decode(&encode_protobuf(&s), WireFormat::Protobuf).unwrap();
        assert_eq!(decoded.device_id, "d");
        assert_eq!(decoded.metrics.len(), 1);
        assert_eq!(decoded.metrics["humidity"], 40.0);
    }

    #[test]
    fn sample_without_metrics_is_valid() {
        let s = TelemetrySample::new("quiet-device", 10);
        let decoded = decode(&encode_json(&s).unwrap(), WireFormat::Json).unwrap();
        assert!(decoded.metrics.is_empty());
    }

    #[test]
    fn wire_format_serde_is_lowercase() {
        assert_eq!(serde_json::to_string(&WireFormat::Json).unwrap(), "\"json\"");
        let f: WireFormat = serde_json::from_str("\"protobuf\"").unwrap();
        assert_eq!(f, WireFormat::Protobuf);
    }
}
