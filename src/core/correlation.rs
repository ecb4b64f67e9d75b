//! Correlation ids carried in the first four bytes of every payload.
//!
//! The initiator stamps a fresh id into each request; the responder copies
//! the same four bytes into its reply without interpreting them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{constants, ProtocolError, Result};

/// Size of the correlation prefix in bytes
pub const CORRELATION_SIZE: usize = 4;

/// Identifier pairing a perf request with its reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CorrelationId(u32);

impl CorrelationId {
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn value(self) -> u32 {
        self.0
    }

    /// Read the id from the first four bytes of a payload (little-endian)
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        let prefix: [u8; CORRELATION_SIZE] = payload
            .get(..CORRELATION_SIZE)
            .and_then(|p| p.try_into().ok())
            .ok_or_else(|| {
                ProtocolError::Framing(format!(
                    "{} (got {} bytes)",
                    constants::ERR_SHORT_PAYLOAD,
                    payload.len()
                ))
            })?;
        Ok(Self(u32::from_le_bytes(prefix)))
    }

    /// Write the id into the first four bytes of `payload`
    pub fn write_prefix(self, payload: &mut [u8]) -> Result<()> {
        let prefix = payload
            .get_mut(..CORRELATION_SIZE)
            .ok_or_else(|| ProtocolError::Framing(constants::ERR_SHORT_PAYLOAD.to_string()))?;
        prefix.copy_from_slice(&self.0.to_le_bytes());
        Ok(())
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Copy the correlation prefix of `request` into `reply` verbatim
pub fn copy_prefix(request: &[u8], reply: &mut [u8]) -> Result<()> {
    let src = request
        .get(..CORRELATION_SIZE)
        .ok_or_else(|| ProtocolError::Framing(constants::ERR_SHORT_PAYLOAD.to_string()))?;
    let dst = reply
        .get_mut(..CORRELATION_SIZE)
        .ok_or_else(|| ProtocolError::Framing(constants::ERR_SHORT_PAYLOAD.to_string()))?;
    dst.copy_from_slice(src);
    Ok(())
}
