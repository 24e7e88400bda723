use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::config::StatsConfig;
use crate::error::{StatsError, StatsResult};
use crate::types::{DeviceId, Metric, MetricSeries, Reading, ReadingValues};

/// Read access to a device's reading log.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Number of readings the device has emitted, including readings that have
    /// not reached the log yet.
    async fn total_readings_count(&self, device_id: DeviceId) -> StatsResult<u64>;

    /// Most recently created reading in the log, if any.
    async fn latest_reading(&self, device_id: DeviceId) -> StatsResult<Option<Reading>>;
}

/// Read access to the aggregates produced by the batch process.
#[async_trait]
pub trait MetricSeriesStore: Send + Sync {
    async fn find(&self, device_id: DeviceId, metric: Metric) -> StatsResult<MetricSeries>;
}

/// SQLite backed device log and aggregate table.
///
/// The trait impls are the read side used by [`crate::StatsView`]. The
/// inherent writer methods belong to ingestion and the batch process and are
/// never called by the view.
#[derive(Debug, Clone)]
pub struct SqliteStatsStore {
    db_path: PathBuf,
}

impl SqliteStatsStore {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    pub fn from_config(config: &StatsConfig) -> StatsResult<Self> {
        config
            .database_path
            .as_ref()
            .map(Self::new)
            .ok_or_else(|| StatsError::Config("database_path is not set".to_string()))
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    async fn with_connection<T, F>(&self, func: F) -> StatsResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StatsResult<T> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut connection = open_connection(&db_path)?;
            func(&mut connection)
        })
        .await
        .map_err(|error| StatsError::Task(error.to_string()))?
    }

    pub async fn init(&self) -> StatsResult<()> {
        self.with_connection(|connection| {
            connection.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS devices (
                    device_id INTEGER PRIMARY KEY,
                    readings_count INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS readings (
                    device_id INTEGER NOT NULL,
                    sequence_number INTEGER NOT NULL,
                    created_at TEXT NOT NULL,
                    temperature REAL NOT NULL,
                    humidity REAL NOT NULL,
                    battery_charge REAL NOT NULL,
                    PRIMARY KEY(device_id, sequence_number),
                    FOREIGN KEY(device_id) REFERENCES devices(device_id) ON DELETE CASCADE
                );

                CREATE TABLE IF NOT EXISTS metric_series (
                    device_id INTEGER NOT NULL,
                    metric TEXT NOT NULL,
                    average REAL NOT NULL,
                    maximum REAL NOT NULL,
                    minimum REAL NOT NULL,
                    updated_at TEXT NOT NULL,
                    PRIMARY KEY(device_id, metric),
                    FOREIGN KEY(device_id) REFERENCES devices(device_id) ON DELETE CASCADE
                );

                CREATE INDEX IF NOT EXISTS idx_readings_created_at ON readings(device_id, created_at);
                "#,
            )?;
            Ok(())
        })
        .await
    }

    pub async fn register_device(&self, device_id: DeviceId) -> StatsResult<()> {
        let created_at = format_timestamp(Utc::now());

        self.with_connection(move |connection| {
            connection.execute(
                "INSERT OR IGNORE INTO devices (device_id, readings_count, created_at) VALUES (?1, 0, ?2)",
                params![device_id.value(), created_at],
            )?;
            Ok(())
        })
        .await
    }

    /// Counts a new reading against the device and assigns its sequence number.
    ///
    /// The returned reading is not in the log yet; it becomes visible to the
    /// resolver once passed to [`SqliteStatsStore::append_reading`]. Until
    /// then it is pending.
    pub async fn reserve_reading(
        &self,
        device_id: DeviceId,
        created_at: DateTime<Utc>,
        values: ReadingValues,
    ) -> StatsResult<Reading> {
        self.with_connection(move |connection| {
            let tx = connection.transaction()?;
            let sequence_number = increment_readings_count(&tx, device_id)?;
            tx.commit()?;

            Ok(Reading {
                device_id,
                sequence_number,
                created_at,
                values,
            })
        })
        .await
    }

    pub async fn append_reading(&self, reading: &Reading) -> StatsResult<()> {
        let reading = reading.clone();

        self.with_connection(move |connection| insert_reading(connection, &reading))
            .await
    }

    /// Counts and logs a reading in one transaction, so it is never pending.
    pub async fn record_reading(
        &self,
        device_id: DeviceId,
        created_at: DateTime<Utc>,
        values: ReadingValues,
    ) -> StatsResult<Reading> {
        self.with_connection(move |connection| {
            let tx = connection.transaction()?;
            let reading = Reading {
                device_id,
                sequence_number: increment_readings_count(&tx, device_id)?,
                created_at,
                values,
            };
            insert_reading(&tx, &reading)?;
            tx.commit()?;
            Ok(reading)
        })
        .await
    }

    pub async fn upsert_series(&self, series: &MetricSeries) -> StatsResult<()> {
        let series = series.clone();
        let updated_at = format_timestamp(Utc::now());

        self.with_connection(move |connection| {
            connection.execute(
                r#"
                INSERT INTO metric_series (
                    device_id, metric, average, maximum, minimum, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(device_id, metric) DO UPDATE SET
                    average = excluded.average,
                    maximum = excluded.maximum,
                    minimum = excluded.minimum,
                    updated_at = excluded.updated_at
                "#,
                params![
                    series.device_id.value(),
                    series.metric.as_str(),
                    series.average,
                    series.maximum,
                    series.minimum,
                    updated_at,
                ],
            )?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl DeviceStore for SqliteStatsStore {
    async fn total_readings_count(&self, device_id: DeviceId) -> StatsResult<u64> {
        self.with_connection(move |connection| load_readings_count(connection, device_id))
            .await
    }

    async fn latest_reading(&self, device_id: DeviceId) -> StatsResult<Option<Reading>> {
        self.with_connection(move |connection| {
            load_readings_count(connection, device_id)?;

            let row = connection
                .query_row(
                    r#"
                    SELECT sequence_number, created_at, temperature, humidity, battery_charge
                    FROM readings
                    WHERE device_id = ?1
                    ORDER BY created_at DESC, sequence_number DESC
                    LIMIT 1
                    "#,
                    params![device_id.value()],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, f64>(2)?,
                            row.get::<_, f64>(3)?,
                            row.get::<_, f64>(4)?,
                        ))
                    },
                )
                .optional()?;

            let Some((sequence_number, created_at_raw, temperature, humidity, battery_charge)) = row
            else {
                return Ok(None);
            };

            Ok(Some(Reading {
                device_id,
                sequence_number: non_negative(sequence_number, "sequence_number", device_id)?,
                created_at: parse_timestamp(created_at_raw)?,
                values: ReadingValues::new(temperature, humidity, battery_charge),
            }))
        })
        .await
    }
}

#[async_trait]
impl MetricSeriesStore for SqliteStatsStore {
    async fn find(&self, device_id: DeviceId, metric: Metric) -> StatsResult<MetricSeries> {
        self.with_connection(move |connection| {
            let row = connection
                .query_row(
                    r#"
                    SELECT metric, average, maximum, minimum
                    FROM metric_series
                    WHERE device_id = ?1 AND metric = ?2
                    "#,
                    params![device_id.value(), metric.as_str()],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, f64>(1)?,
                            row.get::<_, f64>(2)?,
                            row.get::<_, f64>(3)?,
                        ))
                    },
                )
                .optional()?;

            let Some((metric_raw, average, maximum, minimum)) = row else {
                return Err(StatsError::RecordNotFound { device_id, metric });
            };

            let metric = Metric::from_db(&metric_raw).ok_or_else(|| {
                StatsError::InvalidData(format!("unknown metric `{}` in metric_series", metric_raw))
            })?;

            Ok(MetricSeries {
                device_id,
                metric,
                average,
                maximum,
                minimum,
            })
        })
        .await
    }
}

fn open_connection(path: &Path) -> StatsResult<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let connection = Connection::open(path)?;
    connection.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA foreign_keys = ON;
        PRAGMA synchronous = NORMAL;
        "#,
    )?;
    Ok(connection)
}

fn load_readings_count(connection: &Connection, device_id: DeviceId) -> StatsResult<u64> {
    let count = connection
        .query_row(
            "SELECT readings_count FROM devices WHERE device_id = ?1",
            params![device_id.value()],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;

    match count {
        Some(count) => non_negative(count, "readings_count", device_id),
        None => Err(StatsError::DeviceNotFound(device_id)),
    }
}

/// Bumps the device's count and returns it as the new sequence number.
fn increment_readings_count(connection: &Connection, device_id: DeviceId) -> StatsResult<u64> {
    let updated = connection.execute(
        "UPDATE devices SET readings_count = readings_count + 1 WHERE device_id = ?1",
        params![device_id.value()],
    )?;
    if updated == 0 {
        return Err(StatsError::DeviceNotFound(device_id));
    }
    load_readings_count(connection, device_id)
}

fn insert_reading(connection: &Connection, reading: &Reading) -> StatsResult<()> {
    let sequence_number = i64::try_from(reading.sequence_number).map_err(|_| {
        StatsError::InvalidData(format!(
            "sequence_number {} out of range for device {}",
            reading.sequence_number, reading.device_id
        ))
    })?;

    connection.execute(
        r#"
        INSERT INTO readings (
            device_id, sequence_number, created_at, temperature, humidity, battery_charge
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
        params![
            reading.device_id.value(),
            sequence_number,
            format_timestamp(reading.created_at),
            reading.values.temperature,
            reading.values.humidity,
            reading.values.battery_charge,
        ],
    )?;
    Ok(())
}

fn non_negative(value: i64, column: &str, device_id: DeviceId) -> StatsResult<u64> {
    u64::try_from(value).map_err(|_| {
        StatsError::InvalidData(format!(
            "negative {} {} for device {}",
            column, value, device_id
        ))
    })
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339()
}

fn parse_timestamp(raw: String) -> StatsResult<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(&raw)?.with_timezone(&Utc))
}
