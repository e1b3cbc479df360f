//! Request/response correlation core
//!
//! This module handles:
//! - Generating correlation ids and request envelopes
//! - Tracking pending requests and waking waiters on resolution
//! - Classifying inbound topics and decoding their payloads
//! - The public command invocation API

mod correlation;
mod invoker;
pub mod router;

pub use correlation::{CorrelationTable, PendingRequest};
pub use invoker::{DeviceClient, InvokeOutcome};
