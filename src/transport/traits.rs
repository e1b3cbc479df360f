//! Transport trait abstraction for pluggable pub/sub backends

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Events emitted by an active transport session
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The broker accepted the connection
    Connected,
    /// The broker acknowledged a subscription
    SubscribeAcked,
    /// An application message arrived
    Message { topic: String, payload: Bytes },
    /// The transport went down
    Disconnected { reason: String },
}

/// Publish side of an established pub/sub session
#[async_trait]
pub trait TransportHandle: Send + Sync + 'static {
    /// Publish a payload to a topic
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;

    /// Subscribe to a topic filter; acknowledged via `SubscribeAcked`
    async fn subscribe(&self, filter: &str) -> Result<()>;

    /// Tear the session down; safe to call more than once
    async fn disconnect(&self) -> Result<()>;
}

/// Factory for establishing transport sessions
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// Open a session, returning the publish handle and the inbound event
    /// stream
    async fn connect(&self) -> Result<(Arc<dyn TransportHandle>, mpsc::Receiver<TransportEvent>)>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}
