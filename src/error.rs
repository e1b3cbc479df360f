//! Error taxonomy for the client
//!
//! Transport-level failures are reported to the immediate caller of
//! `connect`/`invoke`; payload and routing errors never escape the
//! router/correlation boundary and only show up in logs.

use crate::protocol::RequestId;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced to callers of the session and invoker APIs
#[derive(Error, Debug)]
pub enum ClientError {
    /// The transport never reached the ready state
    #[error("Connection failed: {0}")]
    ConnectionFailure(String),

    /// No response arrived within the deadline; the request id is included
    /// so the failure can be correlated with device-side logs
    #[error("No response received for {id} within {timeout:?}")]
    Timeout { id: RequestId, timeout: Duration },

    /// A correlation slot already exists for this id; ids are generated
    /// uniquely, so this is a caller bug rather than a protocol condition
    #[error("Duplicate correlation id: {0}")]
    DuplicateId(RequestId),

    /// Transport-level failure while publishing or subscribing
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}
