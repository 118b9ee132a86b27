//! Server setup and lifecycle management

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};
use vigil_sink::{InMemorySink, LoggingPublisher, PostgresSink, Publisher, Sink};

use crate::api::{create_router, AppState};
use crate::config::{DaemonConfig, SinkConfig, SourceKind};
use crate::error::{DaemonError, DaemonResult};
use crate::pipeline::{Pipeline, AGGREGATOR_CONSUMER, DETECTOR_CONSUMER};
use crate::stream::{MemoryLog, Simulator, TelemetrySource};

/// Vigil daemon server
pub struct Server {
    config: DaemonConfig,
    pipeline: Pipeline,
    aggregator_source: Box<dyn TelemetrySource>,
    detector_source: Box<dyn TelemetrySource>,
    log: Option<MemoryLog>,
}

impl Server {
    /// Connect the sink, publishers and sources. Any failure here is fatal.
    pub async fn new(config: DaemonConfig) -> DaemonResult<Self> {
        config.validate().map_err(DaemonError::Config)?;

        let sink = connect_sink(&config.sink).await?;
        let (aggregates, alerts) = build_publishers(&config)?;
        let pipeline = Pipeline::new(&config, sink, aggregates, alerts)?;

        let (aggregator_source, detector_source, log) = open_sources(&config)?;

        Ok(Self {
            config,
            pipeline,
            aggregator_source,
            detector_source,
            log,
        })
    }

    /// The in-process log behind `memory` and `simulated` sources.
    pub fn memory_log(&self) -> Option<&MemoryLog> {
        self.log.as_ref()
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Run until SIGINT/SIGTERM.
    pub async fn run(self) -> DaemonResult<()> {
        let addr = self.config.server.listen_addr;
        let listener = TcpListener::bind(addr).await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let tasks = self.pipeline.spawn(
            self.aggregator_source,
            self.detector_source,
            shutdown_rx.clone(),
        );

        let simulator = match (&self.log, self.config.stream.source) {
            (Some(log), SourceKind::Simulated) => {
                let simulator = Simulator::new(&self.config.simulation, self.config.stream.wire_format);
                Some(tokio::spawn(simulator.run(log.clone(), shutdown_rx.clone())))
            }
            _ => None,
        };

        let state = AppState::new(&self.pipeline, shutdown_rx);
        let app = create_router(state, self.config.server.enable_cors);

        info!("Vigil daemon listening on {}", addr);
        info!(
            source = ?self.config.stream.source,
            wire_format = ?self.config.stream.wire_format,
            "Telemetry pipeline started"
        );

        let signal_tx = shutdown_tx.clone();
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                let _ = signal_tx.send(true);
            })
            .await
            .map_err(|e| DaemonError::Server(e.to_string()));

        info!("Vigil daemon shutting down");
        let _ = shutdown_tx.send(true);

        if let Some(handle) = simulator {
            if let Err(e) = handle.await {
                warn!(error = %e, "Simulator task failed");
            }
        }

        let summary = self.pipeline.shutdown(tasks).await;
        info!(
            aggregated = summary.aggregation.processed,
            detected = summary.detection.processed,
            final_flush = summary.final_flush.map(|r| r.windows),
            "Pipeline stopped"
        );

        served
    }
}

async fn connect_sink(config: &SinkConfig) -> DaemonResult<Arc<dyn Sink>> {
    match config {
        SinkConfig::Memory { retention } => {
            info!(retention, "Using in-memory sink");
            Ok(Arc::new(InMemorySink::with_retention(*retention)))
        }
        SinkConfig::Postgres {
            url,
            max_connections,
        } => {
            let sink = PostgresSink::connect(url, *max_connections).await?;
            Ok(Arc::new(sink))
        }
    }
}

fn build_publishers(
    config: &DaemonConfig,
) -> DaemonResult<(Arc<dyn Publisher>, Arc<dyn Publisher>)> {
    #[cfg(feature = "kafka")]
    {
        if config.stream.source == SourceKind::Kafka {
            let brokers = &config.stream.brokers;
            let aggregates = vigil_sink::KafkaPublisher::new(brokers, &config.topics.aggregates)?;
            let alerts = vigil_sink::KafkaPublisher::new(brokers, &config.topics.alerts)?;
            let aggregates: Arc<dyn Publisher> = Arc::new(aggregates);
            let alerts: Arc<dyn Publisher> = Arc::new(alerts);
            return Ok((aggregates, alerts));
        }
    }

    let aggregates: Arc<dyn Publisher> =
        Arc::new(LoggingPublisher::new(config.topics.aggregates.clone()));
    let alerts: Arc<dyn Publisher> = Arc::new(LoggingPublisher::new(config.topics.alerts.clone()));
    Ok((aggregates, alerts))
}

type Sources = (
    Box<dyn TelemetrySource>,
    Box<dyn TelemetrySource>,
    Option<MemoryLog>,
);

/// One independent subscription per consumer.
fn open_sources(config: &DaemonConfig) -> DaemonResult<Sources> {
    match config.stream.source {
        SourceKind::Memory | SourceKind::Simulated => {
            let log = MemoryLog::default();
            let aggregator: Box<dyn TelemetrySource> = Box::new(log.subscribe());
            let detector: Box<dyn TelemetrySource> = Box::new(log.subscribe());
            Ok((aggregator, detector, Some(log)))
        }
        #[cfg(feature = "kafka")]
        SourceKind::Kafka => {
            use crate::stream::KafkaSource;
            let stream = &config.stream;
            let aggregator: Box<dyn TelemetrySource> = Box::new(KafkaSource::new(
                &stream.brokers,
                &stream.topic,
                &stream.group_id(AGGREGATOR_CONSUMER),
            )?);
            let detector: Box<dyn TelemetrySource> = Box::new(KafkaSource::new(
                &stream.brokers,
                &stream.topic,
                &stream.group_id(DETECTOR_CONSUMER),
            )?);
            Ok((aggregator, detector, None))
        }
        #[cfg(not(feature = "kafka"))]
        SourceKind::Kafka => Err(DaemonError::Config(format!(
            "stream.source = kafka requires the `kafka` feature (groups {} / {})",
            config.stream.group_id(AGGREGATOR_CONSUMER),
            config.stream.group_id(DETECTOR_CONSUMER)
        ))),
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
