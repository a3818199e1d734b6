//! Per-message ingest: decode, validate, store

use crate::IngestError;
use chrono::{DateTime, Utc};
use data_validator::Validator;
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use storage::{Repository, SensorRecord};
use tracing::{debug, info, warn};

/// JSON body published by the sensor node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorPayload {
    pub temperature: f64,
    pub humidity: f64,
    /// Time of the reading. Only an RFC 3339 string is honoured; the
    /// firmware does not send one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
}

impl SensorPayload {
    /// Convert into a record, stamping with `received_at` when the payload
    /// carries no usable timestamp
    pub fn into_record(self, received_at: DateTime<Utc>) -> SensorRecord {
        let timestamp = match &self.timestamp {
            None | Some(Value::Null) => received_at,
            Some(Value::String(raw)) => match DateTime::parse_from_rfc3339(raw) {
                Ok(ts) => ts.with_timezone(&Utc),
                Err(e) => {
                    debug!("Ignoring unparseable timestamp {:?}: {}", raw, e);
                    received_at
                }
            },
            Some(other) => {
                debug!("Ignoring non-string timestamp {}", other);
                received_at
            }
        };

        SensorRecord {
            temperature: self.temperature,
            humidity: self.humidity,
            timestamp,
        }
    }
}

/// Turns raw MQTT payloads into stored readings
#[derive(Clone)]
pub struct MessageHandler {
    repository: Arc<Repository>,
    validator: Validator,
}

impl MessageHandler {
    pub fn new(repository: Arc<Repository>, validator: Validator) -> Self {
        Self {
            repository,
            validator,
        }
    }

    /// Decode, validate and persist one payload
    pub async fn handle(&self, payload: &[u8]) -> Result<SensorRecord, IngestError> {
        counter!("weather_readings_received_total").increment(1);
        debug!("Received MQTT message: {}", String::from_utf8_lossy(payload));

        let result = self.ingest(payload).await;
        match &result {
            Ok(record) => {
                counter!("weather_readings_stored_total").increment(1);
                info!(
                    temperature = record.temperature,
                    humidity = record.humidity,
                    "Sensor data inserted successfully"
                );
            }
            Err(e) => {
                counter!("weather_readings_rejected_total", "reason" => e.reason()).increment(1);
                warn!("Dropping sensor message: {}", e);
            }
        }
        result
    }

    async fn ingest(&self, payload: &[u8]) -> Result<SensorRecord, IngestError> {
        let payload: SensorPayload = serde_json::from_slice(payload)?;

        let validation = self
            .validator
            .validate_reading(payload.temperature, payload.humidity);
        if let Some(error) = validation.errors.into_iter().next() {
            return Err(IngestError::Validation(error));
        }

        let record = payload.into_record(Utc::now());
        self.repository.insert_reading(&record).await?;
        Ok(record)
    }
}
