//! Repository Implementation

use crate::StorageError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{debug, info};

const SCHEMA: [&str; 2] = [
    "CREATE TABLE IF NOT EXISTS sensor_data ( \
        id INTEGER PRIMARY KEY AUTOINCREMENT, \
        temperature REAL NOT NULL, \
        humidity REAL NOT NULL, \
        timestamp TEXT NOT NULL \
    )",
    "CREATE INDEX IF NOT EXISTS idx_sensor_data_timestamp ON sensor_data (timestamp)",
];

/// A single temperature/humidity reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SensorRecord {
    /// Temperature (°C)
    pub temperature: f64,
    /// Relative humidity (%)
    pub humidity: f64,
    /// When the reading was taken
    pub timestamp: DateTime<Utc>,
}

impl SensorRecord {
    /// Reading stamped with the current time
    pub fn now(temperature: f64, humidity: f64) -> Self {
        Self {
            temperature,
            humidity,
            timestamp: Utc::now(),
        }
    }
}

/// Database connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite connection URL
    pub url: String,
    /// Pool size
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://weather.db".to_string(),
            max_connections: 5,
        }
    }
}

impl StorageConfig {
    fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }
}

/// Repository for sensor readings backed by SQLite
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Open (creating if missing) the database and ensure the schema exists
    pub async fn connect(config: &StorageConfig) -> Result<Self, StorageError> {
        let mut options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| StorageError::InvalidUrl {
                url: config.url.clone(),
                reason: e.to_string(),
            })?
            .create_if_missing(true);

        let mut pool_options = SqlitePoolOptions::new();
        if config.is_in_memory() {
            // Every connection to :memory: is a separate database
            pool_options = pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        } else {
            options = options.journal_mode(SqliteJournalMode::Wal);
            pool_options = pool_options.max_connections(config.max_connections.max(1));
        }

        let pool = pool_options.connect_with(options).await?;
        let repository = Self { pool };
        repository.migrate().await?;

        info!("Opened sensor database at {}", config.url);
        Ok(repository)
    }

    /// Create a private in-memory repository
    pub async fn in_memory() -> Result<Self, StorageError> {
        Self::connect(&StorageConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
        })
        .await
    }

    async fn migrate(&self) -> Result<(), StorageError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Insert a reading, returning its row id
    pub async fn insert_reading(&self, record: &SensorRecord) -> Result<i64, StorageError> {
        let result = sqlx::query(
            "INSERT INTO sensor_data (temperature, humidity, timestamp) VALUES (?, ?, ?)",
        )
        .bind(record.temperature)
        .bind(record.humidity)
        .bind(record.timestamp)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        debug!("Inserted sensor reading with ID {}", id);
        Ok(id)
    }

    /// Most recent reading, if any
    pub async fn latest(&self) -> Result<Option<SensorRecord>, StorageError> {
        let record = sqlx::query_as::<_, SensorRecord>(
            "SELECT temperature, humidity, timestamp FROM sensor_data \
             ORDER BY timestamp DESC, id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    /// Up to `limit` most recent readings, newest first
    pub async fn history(&self, limit: u32) -> Result<Vec<SensorRecord>, StorageError> {
        let records = sqlx::query_as::<_, SensorRecord>(
            "SELECT temperature, humidity, timestamp FROM sensor_data \
             ORDER BY timestamp DESC, id DESC LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    /// Total number of stored readings
    pub async fn count(&self) -> Result<i64, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sensor_data")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Check the database is reachable
    pub async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Close the pool, waiting for connections to be returned
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
