//! Command invoker and typed command wrappers
//!
//! `invoke` turns the pub/sub substrate into a request/response call: it
//! registers a correlation slot, publishes the envelope, and suspends until
//! the slot resolves or the deadline fires. The command wrappers are pure
//! envelope builders on top of it.

use crate::error::ClientError;
use crate::protocol::{RequestId, RpcRequest, RpcResponse, TopicConfig};
use crate::rpc::correlation::CorrelationTable;
use crate::transport::TransportHandle;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Outcome of a command invocation
#[derive(Debug)]
pub enum InvokeOutcome {
    /// Published without awaiting a response
    Accepted { id: RequestId },
    /// The device answered within the deadline
    Response(RpcResponse),
}

/// Issues commands to the device over an established session
///
/// Cheap to clone; concurrent invocations each own their id and slot and
/// never block one another.
#[derive(Clone)]
pub struct DeviceClient {
    handle: Arc<dyn TransportHandle>,
    table: Arc<CorrelationTable>,
    topics: TopicConfig,
    connected: Arc<AtomicBool>,
    request_timeout: Duration,
    ota_timeout: Duration,
}

impl DeviceClient {
    pub(crate) fn new(
        handle: Arc<dyn TransportHandle>,
        table: Arc<CorrelationTable>,
        topics: TopicConfig,
        connected: Arc<AtomicBool>,
        request_timeout: Duration,
        ota_timeout: Duration,
    ) -> Self {
        Self {
            handle,
            table,
            topics,
            connected,
            request_timeout,
            ota_timeout,
        }
    }

    /// Publish a command and, if requested, await its response
    ///
    /// The slot is registered before the publish, so a response can never
    /// arrive with nowhere to go, however fast the device answers.
    pub async fn invoke(
        &self,
        method: &str,
        params: Value,
        wants_response: bool,
        timeout: Duration,
    ) -> Result<InvokeOutcome, ClientError> {
        if wants_response {
            let response = self.request(method, params, timeout).await?;
            Ok(InvokeOutcome::Response(response))
        } else {
            self.ensure_connected()?;
            let id = RequestId::generate();
            self.publish_request(&id, method, &params).await?;
            debug!(%id, method, "command published, not awaiting");
            Ok(InvokeOutcome::Accepted { id })
        }
    }

    /// Request the current GPS fix
    pub async fn get_gps(&self) -> Result<RpcResponse, ClientError> {
        self.request("get_gps", json!({}), self.request_timeout).await
    }

    /// Request device statistics
    pub async fn get_stats(&self) -> Result<RpcResponse, ClientError> {
        self.request("get_stats", json!({}), self.request_timeout).await
    }

    /// Fetch recent device logs
    pub async fn get_logs(&self, lines: u32, log_type: &str) -> Result<RpcResponse, ClientError> {
        self.request(
            "get_logs",
            json!({"lines": lines, "type": log_type}),
            self.request_timeout,
        )
        .await
    }

    /// Apply a configuration update; the device reports which fields changed
    pub async fn config_update(
        &self,
        config: Map<String, Value>,
    ) -> Result<RpcResponse, ClientError> {
        self.request("config_update", Value::Object(config), self.request_timeout)
            .await
    }

    /// Trigger an OTA firmware update
    ///
    /// Uses the long OTA timeout; download and flash latency on the device
    /// dwarfs every other command.
    pub async fn ota_update(
        &self,
        url: &str,
        version: &str,
        md5: Option<&str>,
    ) -> Result<RpcResponse, ClientError> {
        let mut params = json!({"url": url, "version": version});
        if let Some(md5) = md5 {
            params["md5"] = json!(md5);
        }
        self.request("ota_update", params, self.ota_timeout).await
    }

    /// Schedule a device reboot
    pub async fn reboot(&self, delay_ms: u64) -> Result<RpcResponse, ClientError> {
        self.request("reboot", json!({"delay_ms": delay_ms}), self.request_timeout)
            .await
    }

    /// Change a reporting interval (`gps_publish` or `stats_publish`)
    pub async fn set_interval(&self, kind: &str, value_ms: u64) -> Result<RpcResponse, ClientError> {
        self.request(
            "set_interval",
            json!({"type": kind, "value_ms": value_ms}),
            self.request_timeout,
        )
        .await
    }

    async fn request(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<RpcResponse, ClientError> {
        self.ensure_connected()?;

        // Register before publish so the response cannot race the slot
        let pending = self.table.register(RequestId::generate())?;
        self.publish_request(pending.id(), method, &params).await?;
        debug!(id = %pending.id(), method, ?timeout, "command published, awaiting response");

        pending.wait(timeout).await
    }

    async fn publish_request(
        &self,
        id: &RequestId,
        method: &str,
        params: &Value,
    ) -> Result<(), ClientError> {
        let request = RpcRequest {
            method: method.to_string(),
            params: params.clone(),
        };
        let payload =
            serde_json::to_vec(&request).map_err(|e| ClientError::Transport(e.into()))?;
        self.handle
            .publish(&self.topics.request_topic(id), payload)
            .await?;
        Ok(())
    }

    fn ensure_connected(&self) -> Result<(), ClientError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ClientError::ConnectionFailure(
                "Not connected to broker".into(),
            ))
        }
    }
}
