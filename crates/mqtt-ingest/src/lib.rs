//! MQTT Ingest
//!
//! Subscribes to the sensor topic and turns every published message into a
//! stored reading:
//! - JSON decoding of the sensor payload
//! - Range validation
//! - Persistence through the storage repository
//!
//! Failures are logged and the offending message is dropped.

mod config;
mod handler;
mod subscriber;

pub use config::MqttConfig;
pub use handler::{MessageHandler, SensorPayload};
pub use subscriber::Subscriber;

use data_validator::ValidationError;
use storage::StorageError;
use thiserror::Error;

/// Ingest error types
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Malformed sensor payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Reading rejected: {0}")]
    Validation(ValidationError),

    #[error("Failed to store reading: {0}")]
    Storage(#[from] StorageError),

    #[error("MQTT client error: {0}")]
    Client(String),

    #[error("Unsupported QoS level {0}")]
    InvalidQos(u8),
}

impl IngestError {
    /// Short label used for the rejection metric
    pub fn reason(&self) -> &'static str {
        match self {
            IngestError::Decode(_) => "decode",
            IngestError::Validation(_) => "validation",
            IngestError::Storage(_) => "storage",
            IngestError::Client(_) => "client",
            IngestError::InvalidQos(_) => "qos",
        }
    }
}

impl From<rumqttc::ClientError> for IngestError {
    fn from(err: rumqttc::ClientError) -> Self {
        IngestError::Client(err.to_string())
    }
}
