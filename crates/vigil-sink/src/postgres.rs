//! PostgreSQL sink implementation
//!
//! Writes to plain tables and, when the TimescaleDB extension is installed,
//! converts `metric_aggregates` and `alerts` into hypertables.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use tracing::{debug, info, warn};
use vigil_types::{AggregateRecord, AlertRecord};

use crate::error::{SinkError, SinkResult};
use crate::traits::{AggregateSink, AlertSink, DeviceSink};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// PostgreSQL-backed sink
#[derive(Debug, Clone)]
pub struct PostgresSink {
    pool: PgPool,
}

impl PostgresSink {
    /// Connect, verify the connection and initialize the schema
    pub async fn connect(url: &str, max_connections: u32) -> SinkResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(CONNECT_TIMEOUT)
            .connect(url)
            .await
            .map_err(|e| SinkError::Connection(e.to_string()))?;

        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .map_err(|e| SinkError::Connection(e.to_string()))?;

        let sink = Self { pool };
        sink.initialize_schema().await?;
        info!("Connected to PostgreSQL sink");
        Ok(sink)
    }

    async fn initialize_schema(&self) -> SinkResult<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS metric_aggregates (
                device_id TEXT NOT NULL,
                timestamp TIMESTAMPTZ NOT NULL,
                window_start TIMESTAMPTZ NOT NULL,
                window_end TIMESTAMPTZ NOT NULL,
                metric_name TEXT NOT NULL,
                metric_value DOUBLE PRECISION NOT NULL,
                sample_count BIGINT NOT NULL,
                created_at TIMESTAMPTZ DEFAULT NOW()
            );
            "#,
            r#"CREATE INDEX IF NOT EXISTS idx_metric_aggregates_device_time ON metric_aggregates (device_id, timestamp DESC);"#,
            r#"CREATE INDEX IF NOT EXISTS idx_metric_aggregates_metric_time ON metric_aggregates (metric_name, timestamp DESC);"#,
            r#"
            CREATE TABLE IF NOT EXISTS alerts (
                id BIGSERIAL,
                device_id TEXT NOT NULL,
                timestamp TIMESTAMPTZ NOT NULL,
                metric_name TEXT NOT NULL,
                metric_value DOUBLE PRECISION NOT NULL,
                alert_type TEXT NOT NULL,
                severity TEXT NOT NULL,
                z_score DOUBLE PRECISION,
                threshold DOUBLE PRECISION,
                status TEXT DEFAULT 'open',
                message TEXT,
                created_at TIMESTAMPTZ DEFAULT NOW(),
                acknowledged_at TIMESTAMPTZ,
                resolved_at TIMESTAMPTZ,
                PRIMARY KEY (id, timestamp)
            );
            "#,
            r#"CREATE INDEX IF NOT EXISTS idx_alerts_device_time ON alerts (device_id, timestamp DESC);"#,
            r#"CREATE INDEX IF NOT EXISTS idx_alerts_status_time ON alerts (status, timestamp DESC);"#,
            r#"CREATE INDEX IF NOT EXISTS idx_alerts_severity_time ON alerts (severity, timestamp DESC);"#,
            r#"
            CREATE TABLE IF NOT EXISTS devices (
                device_id TEXT PRIMARY KEY,
                device_name TEXT,
                device_type TEXT,
                location TEXT,
                last_seen TIMESTAMPTZ,
                status TEXT DEFAULT 'active',
                metadata JSONB,
                created_at TIMESTAMPTZ DEFAULT NOW(),
                updated_at TIMESTAMPTZ DEFAULT NOW()
            );
            "#,
            r#"CREATE INDEX IF NOT EXISTS idx_devices_last_seen ON devices (last_seen DESC);"#,
            r#"CREATE INDEX IF NOT EXISTS idx_devices_status ON devices (status);"#,
        ];

        for stmt in statements {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| SinkError::Query(e.to_string()))?;
        }

        for table in ["metric_aggregates", "alerts"] {
            let stmt =
                format!("SELECT create_hypertable('{table}', 'timestamp', if_not_exists => TRUE)");
            let result = sqlx::query(&stmt).execute(&self.pool).await;
            if let Err(e) = result {
                warn!(table, error = %e, "Hypertable not created, continuing with a plain table");
            }
        }

        debug!("Sink schema initialized");
        Ok(())
    }
}

fn timestamp(ms: i64) -> SinkResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| SinkError::Serialization(format!("timestamp out of range: {ms}")))
}

#[async_trait]
impl AggregateSink for PostgresSink {
    async fn insert_aggregates(&self, records: Vec<AggregateRecord>) -> SinkResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for record in &records {
            sqlx::query(
                r#"
                INSERT INTO metric_aggregates
                (device_id, timestamp, window_start, window_end, metric_name, metric_value, sample_count)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(&record.device_id)
            .bind(timestamp(record.timestamp)?)
            .bind(timestamp(record.window_start)?)
            .bind(timestamp(record.window_end)?)
            .bind(&record.metric_name)
            .bind(record.metric_value)
            .bind(i64::try_from(record.sample_count).unwrap_or(i64::MAX))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!(rows = records.len(), "Inserted aggregates");
        Ok(())
    }
}

#[async_trait]
impl AlertSink for PostgresSink {
    async fn insert_alert(&self, alert: AlertRecord) -> SinkResult<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO alerts
            (device_id, timestamp, metric_name, metric_value, alert_type, severity, z_score, threshold, status, message)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id
            "#,
        )
        .bind(&alert.device_id)
        .bind(timestamp(alert.timestamp)?)
        .bind(&alert.metric_name)
        .bind(alert.value)
        .bind(&alert.alert_type)
        .bind(alert.severity.as_str())
        .bind(alert.z_score)
        .bind(alert.threshold)
        .bind(&alert.status)
        .bind(&alert.message)
        .fetch_one(&self.pool)
        .await?;

        let id: i64 = row.try_get("id")?;
        info!(alert_id = id, device_id = %alert.device_id, "Inserted alert");
        Ok(id)
    }
}

#[async_trait]
impl DeviceSink for PostgresSink {
    async fn touch_device(&self, device_id: &str) -> SinkResult<()> {
        sqlx::query(
            r#"
            INSERT INTO devices (device_id, last_seen, updated_at)
            VALUES ($1, NOW(), NOW())
            ON CONFLICT (device_id)
            DO UPDATE SET last_seen = NOW(), updated_at = NOW()
            "#,
        )
        .bind(device_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_conversion() {
        let ts = timestamp(1_700_000_000_123).unwrap();
        assert_eq!(ts.timestamp_millis(), 1_700_000_000_123);
        assert!(matches!(timestamp(i64::MAX), Err(SinkError::Serialization(_))));
    }

    #[tokio::test]
    async fn connect_to_unreachable_database_fails() {
        let result = PostgresSink::connect("postgres://vigil@127.0.0.1:1/vigil", 1).await;
        assert!(matches!(result, Err(SinkError::Connection(_))));
    }
}
