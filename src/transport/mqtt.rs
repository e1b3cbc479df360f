//! MQTT transport backed by rumqttc
//!
//! A spawned task drives the rumqttc event loop and translates incoming
//! packets into [`TransportEvent`]s; the `AsyncClient` handle carries
//! publishes and subscribes in the other direction.

use super::traits::{TransportConnector, TransportEvent, TransportHandle};
use crate::config::ClientConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Capacity of the inbound event channel
const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Connects to an MQTT broker
pub struct MqttConnector {
    options: MqttOptions,
}

impl MqttConnector {
    /// Build a connector from client configuration
    pub fn new(config: &ClientConfig) -> Self {
        let mut options =
            MqttOptions::new(&config.client_id, &config.broker_host, config.broker_port);
        options.set_keep_alive(Duration::from_secs(60));
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username, password);
        }
        Self { options }
    }
}

#[async_trait]
impl TransportConnector for MqttConnector {
    async fn connect(&self) -> Result<(Arc<dyn TransportHandle>, mpsc::Receiver<TransportEvent>)> {
        let (client, eventloop) = AsyncClient::new(self.options.clone(), 10);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        tokio::spawn(poll_loop(eventloop, event_tx));

        Ok((Arc::new(MqttHandle { client }), event_rx))
    }

    fn name(&self) -> &'static str {
        "mqtt"
    }
}

struct MqttHandle {
    client: AsyncClient,
}

#[async_trait]
impl TransportHandle for MqttHandle {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .context("MQTT publish failed")
    }

    async fn subscribe(&self, filter: &str) -> Result<()> {
        self.client
            .subscribe(filter, QoS::AtLeastOnce)
            .await
            .context("MQTT subscribe failed")
    }

    async fn disconnect(&self) -> Result<()> {
        // An already-closed connection is fine; disconnect stays idempotent
        if let Err(e) = self.client.disconnect().await {
            debug!(error = %e, "MQTT disconnect on closed connection");
        }
        Ok(())
    }
}

/// Drive the rumqttc event loop, forwarding packets as transport events
async fn poll_loop(mut eventloop: EventLoop, event_tx: mpsc::Sender<TransportEvent>) {
    loop {
        let event = match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => TransportEvent::Connected,
            Ok(Event::Incoming(Packet::SubAck(_))) => TransportEvent::SubscribeAcked,
            Ok(Event::Incoming(Packet::Publish(publish))) => TransportEvent::Message {
                topic: publish.topic,
                payload: publish.payload,
            },
            Ok(_) => continue,
            Err(e) => {
                let _ = event_tx
                    .send(TransportEvent::Disconnected {
                        reason: e.to_string(),
                    })
                    .await;
                break;
            }
        };

        if event_tx.send(event).await.is_err() {
            // Session dropped its receiver, nothing left to deliver to
            break;
        }
    }
    debug!("MQTT poll loop stopped");
}
