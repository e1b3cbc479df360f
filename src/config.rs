//! Client configuration

use crate::protocol::{now_ms, TopicConfig};
use std::time::Duration;

/// Configuration for a device client session
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// MQTT broker host
    pub broker_host: String,
    /// MQTT broker port
    pub broker_port: u16,
    /// Broker username, if the broker requires credentials
    pub username: Option<String>,
    /// Broker password
    pub password: Option<String>,
    /// MQTT client id presented to the broker
    pub client_id: String,
    /// Topic layout
    pub topics: TopicConfig,
    /// Deadline for reaching the ready state (connected + subscribed)
    pub connect_timeout: Duration,
    /// Default per-request response timeout
    pub request_timeout: Duration,
    /// Response timeout for OTA updates; device-side flashing dominates
    pub ota_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            broker_host: "127.0.0.1".into(),
            broker_port: 1883,
            username: None,
            password: None,
            client_id: format!("stamplc-client-{}", now_ms() / 1000),
            topics: TopicConfig::default(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            ota_timeout: Duration::from_secs(120),
        }
    }
}
