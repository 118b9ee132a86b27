//! Configuration for vigil-daemon

use std::net::{Ipv4Addr, SocketAddr};

use serde::{Deserialize, Serialize};
use vigil_aggregator::AggregatorConfig;
use vigil_anomaly::DetectorConfig;
use vigil_hub::DEFAULT_SUBSCRIBER_BUFFER;
use vigil_types::WireFormat;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Telemetry stream configuration
    #[serde(default)]
    pub stream: StreamConfig,

    /// Downstream topic names
    #[serde(default)]
    pub topics: TopicsConfig,

    /// Sink configuration
    #[serde(default)]
    pub sink: SinkConfig,

    /// Windowed aggregation
    #[serde(default)]
    pub aggregator: AggregatorConfig,

    /// Anomaly detection
    #[serde(default)]
    pub detector: DetectorConfig,

    /// Live fan-out
    #[serde(default)]
    pub hub: HubConfig,

    /// Simulated device fleet
    #[serde(default)]
    pub simulation: SimulationConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            enable_cors: true,
        }
    }
}

/// Where raw telemetry comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// In-process log, fed by an embedding application
    Memory,
    /// In-process log fed by a simulated device fleet
    Simulated,
    /// Kafka topic (requires the `kafka` feature)
    Kafka,
}

/// Telemetry stream configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Source type
    #[serde(default = "default_source")]
    pub source: SourceKind,

    /// Kafka bootstrap servers
    #[serde(default = "default_brokers")]
    pub brokers: String,

    /// Raw telemetry topic
    #[serde(default = "default_raw_topic")]
    pub topic: String,

    /// Consumer group prefix; each consumer appends its own name
    #[serde(default = "default_group_prefix")]
    pub group_prefix: String,

    /// Encoding of raw records
    #[serde(default)]
    pub wire_format: WireFormat,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            brokers: default_brokers(),
            topic: default_raw_topic(),
            group_prefix: default_group_prefix(),
            wire_format: WireFormat::default(),
        }
    }
}

impl StreamConfig {
    /// Consumer group for one named consumer.
    pub fn group_id(&self, consumer: &str) -> String {
        format!("{}-{}", self.group_prefix, consumer)
    }
}

/// Downstream topics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicsConfig {
    /// Flushed window aggregates
    #[serde(default = "default_aggregates_topic")]
    pub aggregates: String,

    /// Raised anomalies
    #[serde(default = "default_alerts_topic")]
    pub alerts: String,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            aggregates: default_aggregates_topic(),
            alerts: default_alerts_topic(),
        }
    }
}

/// Sink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SinkConfig {
    /// In-memory sink (for development/testing)
    Memory {
        /// Aggregate rows and alerts kept before the oldest are evicted
        #[serde(default = "default_memory_retention")]
        retention: usize,
    },

    /// PostgreSQL / TimescaleDB sink
    Postgres {
        /// Connection URL
        url: String,

        /// Maximum connections in pool
        #[serde(default = "default_pool_size")]
        max_connections: u32,
    },
}

/// Live fan-out configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Envelopes buffered per subscriber before it is dropped
    #[serde(default = "default_hub_buffer")]
    pub buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            buffer: default_hub_buffer(),
        }
    }
}

/// Simulated device fleet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Number of simulated devices
    #[serde(default = "default_sim_devices")]
    pub devices: usize,

    /// Interval between readings of each device, in milliseconds
    #[serde(default = "default_sim_interval")]
    pub interval_ms: u64,

    /// Probability that any one reading is pushed out of range
    #[serde(default = "default_anomaly_rate")]
    pub anomaly_rate: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            devices: default_sim_devices(),
            interval_ms: default_sim_interval(),
            anomaly_rate: default_anomaly_rate(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 8080))
}

fn default_source() -> SourceKind {
    SourceKind::Simulated
}

fn default_brokers() -> String {
    "localhost:9092".to_string()
}

fn default_raw_topic() -> String {
    "raw.events".to_string()
}

fn default_group_prefix() -> String {
    "vigil".to_string()
}

fn default_aggregates_topic() -> String {
    "aggregates.minute".to_string()
}

fn default_alerts_topic() -> String {
    "alerts".to_string()
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self::Memory {
            retention: default_memory_retention(),
        }
    }
}

fn default_memory_retention() -> usize {
    vigil_sink::DEFAULT_RETENTION
}

fn default_pool_size() -> u32 {
    10
}

fn default_hub_buffer() -> usize {
    DEFAULT_SUBSCRIBER_BUFFER
}

fn default_sim_devices() -> usize {
    10
}

fn default_sim_interval() -> u64 {
    1000
}

fn default_anomaly_rate() -> f64 {
    0.1
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration: defaults, then the optional file, then `VIGIL_*`
    /// environment variables (`__` separates nested keys, e.g.
    /// `VIGIL_AGGREGATOR__GRACE_PERIOD_SECS=30`).
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        // Add default configuration
        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        // Add file configuration if provided
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("VIGIL")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Reject combinations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        self.aggregator.validate().map_err(|e| e.to_string())?;
        self.detector.validate().map_err(|e| e.to_string())?;
        if self.hub.buffer == 0 {
            return Err("hub.buffer must be greater than zero".into());
        }
        if let SinkConfig::Memory { retention: 0 } = self.sink {
            return Err("sink.retention must be greater than zero".into());
        }
        if self.stream.source == SourceKind::Simulated {
            if self.simulation.interval_ms == 0 {
                return Err("simulation.interval_ms must be greater than zero".into());
            }
            if !(0.0..=1.0).contains(&self.simulation.anomaly_rate) {
                return Err("simulation.anomaly_rate must be within 0..=1".into());
            }
        }
        if self.stream.source == SourceKind::Kafka && !cfg!(feature = "kafka") {
            return Err("stream.source = kafka requires the `kafka` feature".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.server.listen_addr.port(), 8080);
        assert!(config.server.enable_cors);
        assert!(matches!(
            config.sink,
            SinkConfig::Memory { retention } if retention == vigil_sink::DEFAULT_RETENTION
        ));
        assert_eq!(config.stream.source, SourceKind::Simulated);
        assert_eq!(config.stream.topic, "raw.events");
        assert_eq!(config.topics.aggregates, "aggregates.minute");
        assert_eq!(config.topics.alerts, "alerts");
        assert_eq!(config.hub.buffer, 256);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_group_ids_are_distinct() {
        let stream = StreamConfig::default();
        assert_eq!(stream.group_id("aggregator"), "vigil-aggregator");
        assert_ne!(stream.group_id("aggregator"), stream.group_id("detector"));
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = DaemonConfig::load(None).unwrap();
        assert_eq!(config.aggregator.window_secs, 60);
        assert_eq!(config.detector.min_samples, 10);
        assert_eq!(config.simulation.devices, 10);
    }

    #[test]
    fn test_sink_config_tagged() {
        let sink: SinkConfig =
            serde_json::from_str(r#"{"type":"postgres","url":"postgres://localhost/vigil"}"#).unwrap();
        match sink {
            SinkConfig::Postgres {
                url,
                max_connections,
            } => {
                assert_eq!(url, "postgres://localhost/vigil");
                assert_eq!(max_connections, 10);
            }
            SinkConfig::Memory { .. } => panic!("expected postgres"),
        }

        let sink: SinkConfig = serde_json::from_str(r#"{"type":"memory","retention":50}"#).unwrap();
        assert!(matches!(sink, SinkConfig::Memory { retention: 50 }));
    }

    #[test]
    fn test_validation() {
        let mut config = DaemonConfig::default();
        config.simulation.anomaly_rate = 1.5;
        assert!(config.validate().is_err());

        let mut config = DaemonConfig::default();
        config.hub.buffer = 0;
        assert!(config.validate().is_err());

        let mut config = DaemonConfig::default();
        config.aggregator.window_secs = 0;
        assert!(config.validate().is_err());

        let mut config = DaemonConfig::default();
        config.sink = SinkConfig::Memory { retention: 0 };
        assert!(config.validate().is_err());
    }
}
