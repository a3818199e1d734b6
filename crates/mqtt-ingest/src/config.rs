//! Broker connection settings

use crate::IngestError;
use rumqttc::QoS;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// MQTT subscriber configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Broker host
    pub host: String,
    /// Broker port
    pub port: u16,
    /// Client ID (random when unset)
    pub client_id: Option<String>,
    /// Topic carrying sensor readings
    pub topic: String,
    /// Subscription QoS (0, 1 or 2)
    pub qos: u8,
    /// Keep-alive interval (seconds)
    pub keep_alive_secs: u64,
    /// Pause after a connection error before polling again (seconds)
    pub reconnect_delay_secs: u64,
    /// Optional broker credentials
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "mqtt-broker".to_string(),
            port: 1883,
            client_id: None,
            topic: "sensor/data".to_string(),
            qos: 0,
            keep_alive_secs: 30,
            reconnect_delay_secs: 5,
            username: None,
            password: None,
        }
    }
}

impl MqttConfig {
    /// Subscription QoS
    pub fn qos(&self) -> Result<QoS, IngestError> {
        match self.qos {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(IngestError::InvalidQos(other)),
        }
    }

    /// Configured client ID, or a fresh random one
    pub fn client_id(&self) -> String {
        match &self.client_id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => {
                let suffix = Uuid::new_v4().simple().to_string();
                format!("weather-{}", &suffix[..8])
            }
        }
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_deployment() {
        let config = MqttConfig::default();
        assert_eq!(config.host, "mqtt-broker");
        assert_eq!(config.port, 1883);
        assert_eq!(config.topic, "sensor/data");
        assert_eq!(config.qos().unwrap(), QoS::AtMostOnce);
    }

    #[test]
    fn test_qos_levels() {
        let mut config = MqttConfig::default();
        config.qos = 2;
        assert_eq!(config.qos().unwrap(), QoS::ExactlyOnce);
        config.qos = 3;
        assert!(matches!(config.qos(), Err(IngestError::InvalidQos(3))));
    }

    #[test]
    fn test_client_id() {
        let mut config = MqttConfig::default();
        let generated = config.client_id();
        assert!(generated.starts_with("weather-"));
        assert_eq!(generated.len(), "weather-".len() + 8);
        assert_ne!(generated, config.client_id());

        config.client_id = Some("station-1".to_string());
        assert_eq!(config.client_id(), "station-1");
    }
}
