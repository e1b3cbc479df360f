//! Topic router: classifies inbound messages by topic
//!
//! Pure demultiplexing. Classification is total: every topic maps to exactly
//! one route, and malformed payloads are logged and dropped without touching
//! any pending request.

use crate::protocol::{RpcResponse, TopicConfig};
use serde_json::Value;
use tracing::warn;

/// Classification of one inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// RPC response; carries the wildcard topic segment, expected to be a
    /// request id
    RpcResponse { request_id: String },
    /// Continuous telemetry stream
    Telemetry,
    /// Device attribute update
    Attributes,
    /// No topic rule matched; logged and dropped by the caller
    Unrecognized,
}

/// Classify a topic against the session's topic layout
///
/// Rules in priority order: response prefix with a single id segment,
/// telemetry exact match, attributes exact match, otherwise unrecognized.
/// The id segment is not validated here; a response with no matching slot is
/// dropped by the correlation table.
pub fn classify(topics: &TopicConfig, topic: &str) -> Route {
    if let Some(rest) = topic
        .strip_prefix(topics.rpc_response_prefix.as_str())
        .and_then(|rest| rest.strip_prefix('/'))
    {
        // A `+` subscription only matches one level, anything deeper is not
        // a response topic
        if !rest.is_empty() && !rest.contains('/') {
            return Route::RpcResponse {
                request_id: rest.to_string(),
            };
        }
    }
    if topic == topics.telemetry {
        return Route::Telemetry;
    }
    if topic == topics.attributes {
        return Route::Attributes;
    }
    Route::Unrecognized
}

/// Decode an arbitrary JSON payload, dropping malformed input
pub fn decode_json(topic: &str, payload: &[u8]) -> Option<Value> {
    match serde_json::from_slice(payload) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(%topic, error = %e, "dropping malformed payload");
            None
        }
    }
}

/// Decode an RPC response payload, requiring the payload id to echo the
/// topic's correlation segment
///
/// A mismatched id makes the message unroutable; it is logged and dropped.
pub fn decode_response(request_id: &str, payload: &[u8]) -> Option<RpcResponse> {
    let response: RpcResponse = match serde_json::from_slice(payload) {
        Ok(response) => response,
        Err(e) => {
            warn!(request_id, error = %e, "dropping malformed RPC response");
            return None;
        }
    };

    if response.id.as_str() != request_id {
        warn!(
            topic_id = request_id,
            payload_id = %response.id,
            "response id does not echo topic segment, dropping"
        );
        return None;
    }

    Some(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RpcStatus;
    use serde_json::json;

    #[test]
    fn test_classify_rpc_response() {
        let topics = TopicConfig::default();
        assert_eq!(
            classify(&topics, "v1/devices/me/rpc/response/req-1000"),
            Route::RpcResponse {
                request_id: "req-1000".into()
            }
        );
    }

    #[test]
    fn test_classify_telemetry_and_attributes() {
        let topics = TopicConfig::default();
        assert_eq!(classify(&topics, "v1/devices/me/telemetry"), Route::Telemetry);
        assert_eq!(classify(&topics, "v1/devices/me/attributes"), Route::Attributes);
    }

    #[test]
    fn test_classify_unrecognized() {
        let topics = TopicConfig::default();
        for topic in [
            "v1/devices/me/rpc/request/req-1",
            "v1/devices/me/rpc/response",
            "v1/devices/me/rpc/response/",
            "v1/devices/me/rpc/response/a/b",
            "some/other/topic",
            "",
        ] {
            assert_eq!(classify(&topics, topic), Route::Unrecognized, "{topic:?}");
        }
    }

    #[test]
    fn test_classification_is_total() {
        // Every topic string lands in exactly one route without panicking
        let topics = TopicConfig::default();
        for topic in ["/", "v1", "v1/devices/me/telemetry/extra", "++", "#"] {
            let _ = classify(&topics, topic);
        }
    }

    #[test]
    fn test_decode_response_matching_id() {
        let payload = serde_json::to_vec(&json!({
            "id": "req-1000",
            "status": "success",
            "data": {"valid": true}
        }))
        .unwrap();
        let response = decode_response("req-1000", &payload).unwrap();
        assert_eq!(response.status, RpcStatus::Success);
    }

    #[test]
    fn test_decode_response_mismatched_id_dropped() {
        let payload = serde_json::to_vec(&json!({
            "id": "req-other",
            "status": "success"
        }))
        .unwrap();
        assert!(decode_response("req-1000", &payload).is_none());
    }

    #[test]
    fn test_decode_response_malformed_dropped() {
        assert!(decode_response("req-1", b"not json").is_none());
        assert!(decode_response("req-1", b"{\"id\":42}").is_none());
    }

    #[test]
    fn test_decode_json_malformed_dropped() {
        assert!(decode_json("v1/devices/me/telemetry", b"{broken").is_none());
        assert!(decode_json("v1/devices/me/telemetry", b"{\"lat\":1.0}").is_some());
    }
}
