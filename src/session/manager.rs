//! Session lifecycle: connect, subscribe, drain, disconnect
//!
//! Brings the transport to a ready state (connected with all subscriptions
//! acknowledged) before any command can be issued, then runs the single
//! inbound-drain task that feeds the router/correlation pipeline.

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::protocol::TopicConfig;
use crate::rpc::router::{self, Route};
use crate::rpc::{CorrelationTable, DeviceClient};
use crate::transport::{TransportConnector, TransportEvent, TransportHandle};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Capacity of the telemetry/attribute event channel
const SESSION_EVENT_CAPACITY: usize = 64;

/// Messages the session surfaces outside the RPC path
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Telemetry published by the device
    Telemetry(Value),
    /// Attribute update published by the device
    Attributes(Value),
    /// The session went down
    Closed { reason: String },
}

/// Stream of non-RPC session events
pub struct SessionEvents {
    rx: mpsc::Receiver<SessionEvent>,
}

impl SessionEvents {
    /// Receive the next session event
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.rx.recv().await
    }
}

/// Owns the transport session and the inbound drain task
pub struct SessionManager {
    config: ClientConfig,
    connector: Box<dyn TransportConnector>,
    table: Arc<CorrelationTable>,
    connected: Arc<AtomicBool>,
    handle: Option<Arc<dyn TransportHandle>>,
    drain: Option<JoinHandle<()>>,
}

impl SessionManager {
    /// Create a manager; nothing happens until `connect`
    pub fn new(config: ClientConfig, connector: Box<dyn TransportConnector>) -> Self {
        Self {
            config,
            connector,
            table: CorrelationTable::new(),
            connected: Arc::new(AtomicBool::new(false)),
            handle: None,
            drain: None,
        }
    }

    /// Bring the transport to ready within the configured deadline
    ///
    /// All three subscriptions are acknowledged before this returns, so a
    /// response to the very first request cannot race the subscription and
    /// get lost.
    pub async fn connect(&mut self) -> Result<SessionEvents, ClientError> {
        let deadline = self.config.connect_timeout;
        match timeout(deadline, self.establish()).await {
            Ok(Ok(events)) => {
                info!(transport = self.connector.name(), "session ready");
                Ok(events)
            }
            Ok(Err(e)) => Err(ClientError::ConnectionFailure(e.to_string())),
            Err(_) => Err(ClientError::ConnectionFailure(format!(
                "not ready within {deadline:?}"
            ))),
        }
    }

    async fn establish(&mut self) -> anyhow::Result<SessionEvents> {
        let (handle, mut transport_rx) = self.connector.connect().await?;

        wait_for_accept(&mut transport_rx).await?;

        // Subscribe-before-ready: the response wildcard, telemetry and
        // attributes must all be active before the first publish
        let filters = [
            self.config.topics.response_filter(),
            self.config.topics.telemetry.clone(),
            self.config.topics.attributes.clone(),
        ];
        for filter in &filters {
            handle.subscribe(filter).await?;
        }

        let mut acked = 0;
        while acked < filters.len() {
            match transport_rx.recv().await {
                Some(TransportEvent::SubscribeAcked) => acked += 1,
                Some(TransportEvent::Message { topic, .. }) => {
                    // Nothing can be pending yet
                    debug!(%topic, "message before ready, dropping");
                }
                Some(TransportEvent::Connected) => {}
                Some(TransportEvent::Disconnected { reason }) => {
                    anyhow::bail!("Transport lost during subscribe: {reason}");
                }
                None => anyhow::bail!("Transport closed during subscribe"),
            }
        }

        self.connected.store(true, Ordering::SeqCst);

        let (event_tx, event_rx) = mpsc::channel(SESSION_EVENT_CAPACITY);
        self.drain = Some(tokio::spawn(drain_loop(
            self.config.topics.clone(),
            transport_rx,
            self.table.clone(),
            event_tx,
            self.connected.clone(),
        )));
        self.handle = Some(handle);

        Ok(SessionEvents { rx: event_rx })
    }

    /// Invoker for issuing commands; available while the session is ready
    pub fn client(&self) -> Result<DeviceClient, ClientError> {
        let handle = self
            .handle
            .clone()
            .ok_or_else(|| ClientError::ConnectionFailure("Session not connected".into()))?;
        Ok(DeviceClient::new(
            handle,
            self.table.clone(),
            self.config.topics.clone(),
            self.connected.clone(),
            self.config.request_timeout,
            self.config.ota_timeout,
        ))
    }

    /// Tear the session down; idempotent, safe if never connected
    pub async fn disconnect(&mut self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(drain) = self.drain.take() {
            drain.abort();
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.disconnect().await {
                debug!(error = %e, "transport disconnect failed");
            }
            info!("session disconnected");
        }
    }
}

/// Wait for the broker to accept the connection
async fn wait_for_accept(rx: &mut mpsc::Receiver<TransportEvent>) -> anyhow::Result<()> {
    loop {
        match rx.recv().await {
            Some(TransportEvent::Connected) => return Ok(()),
            Some(TransportEvent::Disconnected { reason }) => {
                anyhow::bail!("Broker rejected connection: {reason}");
            }
            Some(_) => {}
            None => anyhow::bail!("Transport closed before connection was accepted"),
        }
    }
}

/// Single consumer of the inbound stream
///
/// Routes every message: responses resolve correlation slots, telemetry and
/// attributes are forwarded to the session event stream, everything else is
/// logged and dropped. Never blocks on a slow event consumer, so a pending
/// command's resolution cannot be starved.
async fn drain_loop(
    topics: TopicConfig,
    mut transport_rx: mpsc::Receiver<TransportEvent>,
    table: Arc<CorrelationTable>,
    event_tx: mpsc::Sender<SessionEvent>,
    connected: Arc<AtomicBool>,
) {
    while let Some(event) = transport_rx.recv().await {
        match event {
            TransportEvent::Message { topic, payload } => match router::classify(&topics, &topic)
            {
                Route::RpcResponse { request_id } => {
                    if let Some(response) = router::decode_response(&request_id, &payload) {
                        let id = response.id.clone();
                        table.resolve(&id, response);
                    }
                }
                Route::Telemetry => {
                    if let Some(value) = router::decode_json(&topic, &payload) {
                        forward(&event_tx, SessionEvent::Telemetry(value));
                    }
                }
                Route::Attributes => {
                    if let Some(value) = router::decode_json(&topic, &payload) {
                        forward(&event_tx, SessionEvent::Attributes(value));
                    }
                }
                Route::Unrecognized => {
                    debug!(%topic, "dropping message on unrecognized topic");
                }
            },
            TransportEvent::Disconnected { reason } => {
                warn!(%reason, "transport lost");
                connected.store(false, Ordering::SeqCst);
                forward(&event_tx, SessionEvent::Closed { reason });
                break;
            }
            TransportEvent::Connected | TransportEvent::SubscribeAcked => {}
        }
    }
    debug!("inbound drain stopped");
}

fn forward(event_tx: &mpsc::Sender<SessionEvent>, event: SessionEvent) {
    // try_send: a slow or absent event consumer must not stall resolution
    // of pending requests behind it
    if let Err(e) = event_tx.try_send(event) {
        debug!(error = %e, "session event dropped");
    }
}
