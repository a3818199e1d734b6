//! Storage Layer
//!
//! Persists sensor readings to SQLite using the repository pattern.

mod repository;

pub use repository::{Repository, SensorRecord, StorageConfig};

use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
    #[error("Invalid database URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}
