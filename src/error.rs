//! # Error Types
//!
//! Error handling for the perf protocol.
//!
//! Every failure a caller can observe is a variant of [`ProtocolError`]. Errors
//! are delivered as the error case of the relevant result: a `measure()`
//! future, a driver outcome, or a codec call.
//!
//! ## Error Categories
//! - **I/O Errors**: transport read/write failures
//! - **Framing Errors**: payloads too short to carry a correlation prefix, oversized frames
//! - **Protocol Violations**: replies for correlation ids that are not outstanding
//! - **Lifecycle Errors**: timeouts, closed connections, unsupported role operations
//! - **Configuration Errors**: invalid or unreadable settings
//!
//! ## Example Usage
//! ```rust
//! use perf_protocol::error::{ProtocolError, Result};
//! use perf_protocol::core::correlation::CorrelationId;
//! use tracing::{error, info};
//!
//! fn read_id(payload: &[u8]) -> Result<CorrelationId> {
//!     CorrelationId::from_payload(payload)
//! }
//!
//! match read_id(&[1, 2]) {
//!     Ok(id) => info!(%id, "Correlation id"),
//!     Err(e) => error!(error = %e, "Bad payload"),
//! }
//! ```

use crate::core::correlation::CorrelationId;
use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Framing errors
    pub const ERR_SHORT_PAYLOAD: &str = "Payload shorter than the 4-byte correlation prefix";

    /// Role errors
    pub const ERR_RESPONDER_MEASURE: &str = "This is a perf responder only";

    /// Correlation id space exhausted while generating a request
    pub const ERR_CORRELATION_EXHAUSTED: &str =
        "Could not allocate a unique correlation id for the request";
}

// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    #[serde(skip_serializing, skip_deserializing)]
    Io(#[from] io::Error),

    #[error("Framing error: {0}")]
    Framing(String),

    #[error("Protocol violation: unknown or expired perf data in response: {0}")]
    ProtocolViolation(CorrelationId),

    #[error("Frame too large: {0} bytes")]
    OversizedFrame(usize),

    #[error("Perf request timed out")]
    Timeout,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// Whether this error ends the stream rather than a single message
    pub fn is_fatal_to_stream(&self) -> bool {
        matches!(
            self,
            ProtocolError::Io(_)
                | ProtocolError::ProtocolViolation(_)
                | ProtocolError::OversizedFrame(_)
                | ProtocolError::ConnectionClosed
        )
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
