//! MQTT event loop driving the message handler

use crate::{IngestError, MessageHandler, MqttConfig};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Request channel capacity between client and event loop
const CHANNEL_CAPACITY: usize = 10;
/// How long to keep polling for the DISCONNECT to be written on shutdown
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Long-running subscriber for the sensor topic
pub struct Subscriber {
    config: MqttConfig,
    handler: MessageHandler,
}

impl Subscriber {
    /// Create new subscriber
    pub fn new(config: MqttConfig, handler: MessageHandler) -> Self {
        Self { config, handler }
    }

    /// Build rumqttc options from the configuration
    pub fn mqtt_options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(
            self.config.client_id(),
            &self.config.host,
            self.config.port,
        );
        options.set_keep_alive(self.config.keep_alive());
        options.set_clean_session(true);
        if let (Some(username), Some(password)) = (&self.config.username, &self.config.password) {
            options.set_credentials(username, password);
        }
        options
    }

    /// Poll the broker until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// The subscription is (re)issued on every ConnAck since the session is
    /// clean. Connection errors are logged and polling resumes after the
    /// configured delay; rumqttc reconnects on the next poll. On shutdown a
    /// DISCONNECT is sent if the broker connection is up.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), IngestError> {
        let qos = self.config.qos()?;
        let (client, mut eventloop) = AsyncClient::new(self.mqtt_options(), CHANNEL_CAPACITY);
        info!(
            "Connecting to MQTT broker {}:{} (topic {})",
            self.config.host, self.config.port, self.config.topic
        );

        let mut connected = false;
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("Connected to MQTT broker");
                        connected = true;
                        if let Err(e) = client
                            .try_subscribe(&self.config.topic, qos)
                            .map_err(IngestError::from)
                        {
                            error!("Failed to subscribe to {}: {}", self.config.topic, e);
                        }
                    }
                    Ok(Event::Incoming(Packet::SubAck(ack))) => {
                        info!("Subscribed to {} ({:?})", self.config.topic, ack.return_codes);
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        // Errors are logged inside the handler; the message is dropped
                        let _ = self.handler.handle(&publish.payload).await;
                    }
                    Ok(Event::Incoming(incoming)) => {
                        debug!("MQTT incoming: {:?}", incoming);
                    }
                    Ok(Event::Outgoing(_)) => {}
                    Err(e) => {
                        error!("MQTT connection error: {}", e);
                        connected = false;
                        tokio::select! {
                            _ = tokio::time::sleep(self.config.reconnect_delay()) => {}
                            _ = shutdown.changed() => {}
                        }
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        }

        info!("Stopping MQTT subscriber");
        if connected {
            if let Err(e) = disconnect(&client, &mut eventloop).await {
                warn!("MQTT disconnect failed: {}", e);
            }
        }
        Ok(())
    }
}

/// Queue a DISCONNECT and poll until it has been written to the socket
async fn disconnect(client: &AsyncClient, eventloop: &mut EventLoop) -> Result<(), IngestError> {
    client.try_disconnect()?;

    let flushed = tokio::time::timeout(DISCONNECT_TIMEOUT, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) => return Ok(()),
                Ok(_) => {}
                Err(e) => return Err(IngestError::Client(e.to_string())),
            }
        }
    })
    .await;

    match flushed {
        Ok(result) => result,
        Err(_) => Err(IngestError::Client(
            "timed out sending DISCONNECT".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use data_validator::Validator;
    use std::sync::Arc;
    use storage::Repository;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    async fn subscriber(config: MqttConfig) -> Subscriber {
        let repository = Arc::new(Repository::in_memory().await.unwrap());
        Subscriber::new(config, MessageHandler::new(repository, Validator::default()))
    }

    #[tokio::test]
    async fn test_options_from_config() {
        let config = MqttConfig {
            host: "broker.local".to_string(),
            port: 1884,
            client_id: Some("station".to_string()),
            keep_alive_secs: 15,
            ..Default::default()
        };
        let options = subscriber(config).await.mqtt_options();
        assert_eq!(options.broker_address(), ("broker.local".to_string(), 1884));
        assert_eq!(options.client_id(), "station");
        assert_eq!(options.keep_alive(), Duration::from_secs(15));
    }

    #[tokio::test]
    async fn test_invalid_qos_fails_fast() {
        let config = MqttConfig {
            qos: 7,
            ..Default::default()
        };
        let (_tx, rx) = watch::channel(false);
        let result = subscriber(config).await.run(rx).await;
        assert!(matches!(result, Err(IngestError::InvalidQos(7))));
    }

    #[tokio::test]
    async fn test_stops_on_shutdown_without_broker() {
        let config = MqttConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            reconnect_delay_secs: 60,
            ..Default::default()
        };
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(subscriber(config).await.run(rx));

        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("subscriber did not stop")
            .unwrap();
        assert!(result.is_ok());
    }

    /// Read one MQTT control packet as (first header byte, body)
    async fn read_packet(stream: &mut TcpStream) -> Option<(u8, Vec<u8>)> {
        let header = stream.read_u8().await.ok()?;
        let mut remaining = 0usize;
        let mut shift = 0;
        loop {
            let byte = stream.read_u8().await.ok()?;
            remaining |= ((byte & 0x7F) as usize) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        let mut body = vec![0u8; remaining];
        stream.read_exact(&mut body).await.ok()?;
        Some((header, body))
    }

    fn publish_packet(topic: &str, payload: &[u8]) -> Vec<u8> {
        let remaining = 2 + topic.len() + payload.len();
        assert!(remaining < 128);
        let mut packet = vec![0x30, remaining as u8, 0x00, topic.len() as u8];
        packet.extend_from_slice(topic.as_bytes());
        packet.extend_from_slice(payload);
        packet
    }

    #[tokio::test]
    async fn test_stores_publish_and_disconnects_cleanly() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let broker = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();

            let (header, _) = read_packet(&mut stream).await.unwrap();
            assert_eq!(header, 0x10, "expected CONNECT");
            stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();

            let (header, body) = read_packet(&mut stream).await.unwrap();
            assert_eq!(header, 0x82, "expected SUBSCRIBE");
            stream
                .write_all(&[0x90, 0x03, body[0], body[1], 0x00])
                .await
                .unwrap();

            stream
                .write_all(&publish_packet(
                    "sensor/data",
                    br#"{"temperature":21,"humidity":40}"#,
                ))
                .await
                .unwrap();

            let mut after_publish = Vec::new();
            while let Some((header, _)) = read_packet(&mut stream).await {
                after_publish.push(header);
            }
            after_publish
        });

        let repository = Arc::new(Repository::in_memory().await.unwrap());
        let config = MqttConfig {
            host: "127.0.0.1".to_string(),
            port,
            ..Default::default()
        };
        let subscriber = Subscriber::new(
            config,
            MessageHandler::new(repository.clone(), Validator::default()),
        );
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(subscriber.run(rx));

        tokio::time::timeout(Duration::from_secs(5), async {
            while repository.count().await.unwrap() < 1 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("reading was not stored");
        assert_eq!(repository.latest().await.unwrap().unwrap().temperature, 21.0);

        tx.send(true).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("subscriber did not stop")
            .unwrap();
        assert!(result.is_ok());

        let received = tokio::time::timeout(Duration::from_secs(5), broker)
            .await
            .expect("broker did not see the connection close")
            .unwrap();
        assert!(
            received.contains(&0xE0),
            "no DISCONNECT before close: {:02X?}",
            received
        );
    }
}
