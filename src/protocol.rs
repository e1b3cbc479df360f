//! RPC wire types and topic layout
//!
//! The device speaks a ThingsBoard-style JSON convention: requests go to
//! `<request-prefix>/<request-id>`, responses come back on
//! `<response-prefix>/<request-id>` with the id echoed in the payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

static REQUEST_SEQ: AtomicU64 = AtomicU64::new(0);

/// Opaque correlation token linking one outgoing request to its response
///
/// Created per request, consumed exactly once on resolution or timeout,
/// never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a fresh id, unique across concurrent requests
    ///
    /// The timestamp alone can collide under rapid invocation, so a
    /// process-wide counter is appended.
    pub fn generate() -> Self {
        let seq = REQUEST_SEQ.fetch_add(1, Ordering::Relaxed) + 1;
        RequestId(format!("req-{}-{}", now_ms(), seq))
    }

    /// Wrap a raw id as it appeared on the wire
    pub fn from_raw(raw: impl Into<String>) -> Self {
        RequestId(raw.into())
    }

    /// The id as published in topics and payloads
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outgoing request envelope, serialized to the wire exactly once
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest {
    /// Command method name, e.g. `get_gps`
    pub method: String,
    /// Command parameters; the client treats these as opaque
    pub params: Value,
}

/// Response status reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RpcStatus {
    Success,
    Error,
    Pending,
}

/// Incoming response envelope
///
/// The firmware echoes extra fields (`method`, `cmd`); unknown fields are
/// ignored on deserialization.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponse {
    /// Echo of the request id this response answers
    pub id: RequestId,
    pub status: RpcStatus,
    /// Command result payload; absent on some failures
    #[serde(default)]
    pub data: Option<Value>,
    /// Device-side failure message, set when status is `error`
    #[serde(default)]
    pub error: Option<String>,
}

/// Topic layout for one device session
#[derive(Debug, Clone)]
pub struct TopicConfig {
    /// Prefix for outgoing RPC requests; the request id is appended
    pub rpc_request_prefix: String,
    /// Prefix for incoming RPC responses
    pub rpc_response_prefix: String,
    /// Telemetry stream topic
    pub telemetry: String,
    /// Attribute update topic
    pub attributes: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            rpc_request_prefix: "v1/devices/me/rpc/request".into(),
            rpc_response_prefix: "v1/devices/me/rpc/response".into(),
            telemetry: "v1/devices/me/telemetry".into(),
            attributes: "v1/devices/me/attributes".into(),
        }
    }
}

impl TopicConfig {
    /// Wildcard filter covering all RPC responses
    pub fn response_filter(&self) -> String {
        format!("{}/+", self.rpc_response_prefix)
    }

    /// Topic a request with the given id is published to
    pub fn request_topic(&self, id: &RequestId) -> String {
        format!("{}/{}", self.rpc_request_prefix, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_ids_are_unique() {
        let ids: Vec<RequestId> = (0..100).map(|_| RequestId::generate()).collect();
        for (i, a) in ids.iter().enumerate() {
            assert!(a.as_str().starts_with("req-"));
            for b in &ids[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_request_serialization() {
        let request = RpcRequest {
            method: "get_logs".into(),
            params: json!({"lines": 50, "type": "all"}),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["method"], "get_logs");
        assert_eq!(value["params"]["lines"], 50);
    }

    #[test]
    fn test_response_deserialization_ignores_echo_fields() {
        let payload = json!({
            "method": "get_gps",
            "cmd": "get_gps",
            "id": "req-1000",
            "status": "success",
            "data": {"latitude": 37.0}
        });
        let response: RpcResponse = serde_json::from_value(payload).unwrap();
        assert_eq!(response.id, RequestId::from_raw("req-1000"));
        assert_eq!(response.status, RpcStatus::Success);
        assert_eq!(response.data.unwrap()["latitude"], 37.0);
        assert!(response.error.is_none());
    }

    #[test]
    fn test_error_response_carries_message() {
        let payload = json!({
            "id": "req-1",
            "status": "error",
            "error": "GPS module not available"
        });
        let response: RpcResponse = serde_json::from_value(payload).unwrap();
        assert_eq!(response.status, RpcStatus::Error);
        assert_eq!(response.error.as_deref(), Some("GPS module not available"));
        assert!(response.data.is_none());
    }

    #[test]
    fn test_topic_helpers() {
        let topics = TopicConfig::default();
        assert_eq!(topics.response_filter(), "v1/devices/me/rpc/response/+");
        assert_eq!(
            topics.request_topic(&RequestId::from_raw("req-1000")),
            "v1/devices/me/rpc/request/req-1000"
        );
    }
}
