//! In-memory transport for tests and local development
//!
//! Plays broker and device in one process. The remote end inspects what the
//! client publishes and injects inbound messages, so the full
//! request/response pipeline can run without a broker.

use super::traits::{TransportConnector, TransportEvent, TransportHandle};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Connects to an in-process message link
pub struct MemoryConnector {
    event_tx: mpsc::Sender<TransportEvent>,
    event_rx: Mutex<Option<mpsc::Receiver<TransportEvent>>>,
    published_tx: mpsc::UnboundedSender<(String, Bytes)>,
    subscriptions: Arc<Mutex<Vec<String>>>,
}

impl MemoryConnector {
    /// Create a linked connector/remote pair
    pub fn pair() -> (Self, MemoryRemote) {
        let (event_tx, event_rx) = mpsc::channel(64);
        let (published_tx, published_rx) = mpsc::unbounded_channel();
        let subscriptions = Arc::new(Mutex::new(Vec::new()));

        let connector = Self {
            event_tx: event_tx.clone(),
            event_rx: Mutex::new(Some(event_rx)),
            published_tx,
            subscriptions: subscriptions.clone(),
        };
        let remote = MemoryRemote {
            event_tx,
            published_rx,
            subscriptions,
        };
        (connector, remote)
    }
}

#[async_trait]
impl TransportConnector for MemoryConnector {
    async fn connect(&self) -> Result<(Arc<dyn TransportHandle>, mpsc::Receiver<TransportEvent>)> {
        let event_rx = self
            .event_rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| anyhow!("Memory transport already connected"))?;

        // The link is always up; accept immediately
        let _ = self.event_tx.send(TransportEvent::Connected).await;

        let handle = MemoryHandle {
            event_tx: self.event_tx.clone(),
            published_tx: self.published_tx.clone(),
            subscriptions: self.subscriptions.clone(),
        };
        Ok((Arc::new(handle), event_rx))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

struct MemoryHandle {
    event_tx: mpsc::Sender<TransportEvent>,
    published_tx: mpsc::UnboundedSender<(String, Bytes)>,
    subscriptions: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl TransportHandle for MemoryHandle {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.published_tx
            .send((topic.to_string(), Bytes::from(payload)))
            .map_err(|_| anyhow!("Remote end closed"))
    }

    async fn subscribe(&self, filter: &str) -> Result<()> {
        self.subscriptions.lock().unwrap().push(filter.to_string());
        let _ = self.event_tx.send(TransportEvent::SubscribeAcked).await;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }
}

/// Remote end of a memory link: the simulated broker/device
pub struct MemoryRemote {
    event_tx: mpsc::Sender<TransportEvent>,
    published_rx: mpsc::UnboundedReceiver<(String, Bytes)>,
    subscriptions: Arc<Mutex<Vec<String>>>,
}

impl MemoryRemote {
    /// Inject an inbound message as if the device published it
    pub async fn inject(&self, topic: &str, payload: impl Into<Bytes>) {
        let _ = self
            .event_tx
            .send(TransportEvent::Message {
                topic: topic.to_string(),
                payload: payload.into(),
            })
            .await;
    }

    /// Surface a transport loss to the session
    pub async fn close(&self, reason: &str) {
        let _ = self
            .event_tx
            .send(TransportEvent::Disconnected {
                reason: reason.to_string(),
            })
            .await;
    }

    /// Next message the client published, in order
    pub async fn next_published(&mut self) -> Option<(String, Bytes)> {
        self.published_rx.recv().await
    }

    /// Topic filters the client has subscribed to so far
    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_remote() {
        let (connector, mut remote) = MemoryConnector::pair();
        let (handle, _events) = connector.connect().await.unwrap();

        handle.publish("some/topic", b"payload".to_vec()).await.unwrap();

        let (topic, payload) = remote.next_published().await.unwrap();
        assert_eq!(topic, "some/topic");
        assert_eq!(&payload[..], b"payload");
    }

    #[tokio::test]
    async fn test_connect_is_single_use() {
        let (connector, _remote) = MemoryConnector::pair();
        let _first = connector.connect().await.unwrap();
        assert!(connector.connect().await.is_err());
    }

    #[tokio::test]
    async fn test_inject_arrives_as_message() {
        let (connector, remote) = MemoryConnector::pair();
        let (_handle, mut events) = connector.connect().await.unwrap();

        assert!(matches!(events.recv().await, Some(TransportEvent::Connected)));

        remote.inject("v1/devices/me/telemetry", &b"{}"[..]).await;
        match events.recv().await {
            Some(TransportEvent::Message { topic, .. }) => {
                assert_eq!(topic, "v1/devices/me/telemetry");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
