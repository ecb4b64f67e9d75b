//! Responder side of the perf protocol.
//!
//! Every inbound request is answered with `download_size` bytes of filler
//! behind the request's own correlation prefix. The responder keeps no
//! per-request state and never initiates requests.

use std::sync::Arc;

use bytes::Bytes;
use tracing::trace;

use crate::core::payload;
use crate::error::Result;
use crate::utils::metrics::PerfMetrics;

/// Responder state machine bound to one stream
#[derive(Debug, Clone)]
pub struct Responder {
    download_size: usize,
    metrics: Arc<PerfMetrics>,
}

impl Responder {
    pub fn new(download_size: usize, metrics: Arc<PerfMetrics>) -> Self {
        Self {
            download_size,
            metrics,
        }
    }

    /// Build the reply for one request payload.
    ///
    /// Fails with a framing error, affecting only this request, when the
    /// payload is shorter than a correlation prefix.
    pub fn reply(&self, request: &[u8]) -> Result<Bytes> {
        self.metrics.frame_received(request.len());
        let reply = payload::reply(request, self.download_size).map_err(|e| {
            self.metrics.framing_error();
            e
        })?;
        trace!(request = request.len(), reply = reply.len(), "Perf reply built");
        Ok(reply)
    }

    pub fn download_size(&self) -> usize {
        self.download_size
    }

    pub fn metrics(&self) -> &Arc<PerfMetrics> {
        &self.metrics
    }
}
