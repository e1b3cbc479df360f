//! Pluggable pub/sub transport backends
//!
//! This module handles:
//! - The connector/handle seam between the core and the messaging substrate
//! - The rumqttc-backed MQTT transport used in production
//! - An in-memory loopback transport for tests and local development

mod memory;
mod mqtt;
mod traits;

pub use memory::{MemoryConnector, MemoryRemote};
pub use mqtt::MqttConnector;
pub use traits::{TransportConnector, TransportEvent, TransportHandle};
