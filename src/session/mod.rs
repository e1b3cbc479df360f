//! Session lifecycle management
//!
//! This module handles:
//! - Bringing the transport to ready (connected + subscribed) before use
//! - The single inbound-drain task feeding the correlation pipeline
//! - Surfacing telemetry and attribute streams to the caller
//! - Idempotent teardown

mod manager;

pub use manager::{SessionEvent, SessionEvents, SessionManager};
