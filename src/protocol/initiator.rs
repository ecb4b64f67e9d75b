//! Initiator side of the perf protocol.
//!
//! The initiator writes requests of `upload_size` filler bytes, keeps one
//! pending entry per outstanding correlation id and resolves each entry with
//! the round-trip time when the matching reply arrives.
//!
//! ```text
//!   Active ──(stream closed / local close)──► Closed
//! ```
//!
//! Requests may overlap freely while Active. Closing fails every pending
//! request with `ConnectionClosed` and shuts the deadline scheduler down.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::config::ProtocolConfig;
use crate::core::correlation::CorrelationId;
use crate::core::payload;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::pending::{PendingTable, Registration, ResultReceiver};
use crate::utils::metrics::PerfMetrics;
use crate::utils::scheduler::{Deadline, Scheduler};
use crate::utils::time::Clock;

/// Attempts at drawing an unused correlation id before giving up
const MAX_ID_ATTEMPTS: usize = 16;

/// Initiator state machine bound to one stream
pub struct Initiator {
    config: ProtocolConfig,
    table: Arc<PendingTable>,
    scheduler: Arc<dyn Scheduler>,
    clock: Arc<dyn Clock>,
    outbound: mpsc::UnboundedSender<Bytes>,
    metrics: Arc<PerfMetrics>,
}

impl Initiator {
    /// Build an initiator writing request payloads to `outbound`.
    ///
    /// The scheduler belongs to this initiator from here on and is shut
    /// down by [`Initiator::on_close`].
    pub fn new(
        config: ProtocolConfig,
        outbound: mpsc::UnboundedSender<Bytes>,
        scheduler: Arc<dyn Scheduler>,
        clock: Arc<dyn Clock>,
        metrics: Arc<PerfMetrics>,
    ) -> Self {
        Self {
            config,
            table: Arc::new(PendingTable::new()),
            scheduler,
            clock,
            outbound,
            metrics,
        }
    }

    /// Send one perf request.
    ///
    /// The request is registered and queued before this returns; the returned
    /// [`Measurement`] resolves to the round-trip time, `Timeout`, or
    /// `ConnectionClosed`.
    pub fn measure(&self) -> Measurement {
        if self.table.is_closed() {
            return Measurement::failed(ProtocolError::ConnectionClosed);
        }

        let mut request = payload::request(self.config.upload_size);
        let mut id = match CorrelationId::from_payload(&request) {
            Ok(id) => id,
            Err(e) => return Measurement::failed(e),
        };

        for _ in 0..MAX_ID_ATTEMPTS {
            let sent_at = self.clock.now();
            match self.table.register(id, sent_at, |id| self.arm_deadline(id)) {
                Registration::Registered(rx) => {
                    let len = request.len();
                    if self.outbound.send(request.freeze()).is_err() {
                        // Writer is gone; the close path settles the entry
                        debug!(%id, "Perf request not written, stream shutting down");
                    } else {
                        self.metrics.request_sent(len);
                    }
                    debug!(%id, bytes = len, "Perf request sent");
                    return Measurement::pending(id, rx);
                }
                Registration::Closed => {
                    return Measurement::failed(ProtocolError::ConnectionClosed)
                }
                Registration::Duplicate => {
                    id = payload::random_id();
                    if let Err(e) = id.write_prefix(&mut request) {
                        return Measurement::failed(e);
                    }
                }
            }
        }

        Measurement::failed(ProtocolError::Custom(
            constants::ERR_CORRELATION_EXHAUSTED.to_string(),
        ))
    }

    fn arm_deadline(&self, id: CorrelationId) -> Deadline {
        let table: Weak<PendingTable> = Arc::downgrade(&self.table);
        let metrics = self.metrics.clone();
        let timeout = self.config.timeout;

        self.scheduler.schedule(
            timeout,
            Box::new(move || {
                let Some(table) = table.upgrade() else {
                    return;
                };
                if table.expire(id) {
                    metrics.timed_out();
                    warn!(%id, timeout_ms = timeout.as_millis() as u64, "Perf request timed out");
                }
            }),
        )
    }

    /// Handle one decoded reply payload.
    ///
    /// Returns the round-trip time of the matched request. A reply without a
    /// full correlation prefix is a framing error; one whose id is not
    /// outstanding is a protocol violation. Neither touches other entries.
    pub fn on_frame(&self, reply: &[u8]) -> Result<Duration> {
        self.metrics.frame_received(reply.len());

        let id = CorrelationId::from_payload(reply).map_err(|e| {
            self.metrics.framing_error();
            e
        })?;

        match self.table.resolve(id, self.clock.now()) {
            Ok(rtt) => {
                self.metrics.reply_matched(rtt);
                debug!(%id, rtt_us = rtt.as_micros() as u64, "Perf reply matched");
                Ok(rtt)
            }
            Err(e) => {
                self.metrics.protocol_violation();
                warn!(%id, "Perf reply for unknown or expired request");
                Err(e)
            }
        }
    }

    /// Close handling; only the first call has any effect.
    ///
    /// Returns the number of requests failed with `ConnectionClosed`.
    #[instrument(skip(self), level = "debug")]
    pub fn on_close(&self) -> usize {
        let Some(failed) = self.table.close() else {
            return 0;
        };
        self.scheduler.shutdown();
        self.metrics.failed_on_close(failed);
        info!(failed, "Perf initiator closed");
        failed
    }

    pub fn is_closed(&self) -> bool {
        self.table.is_closed()
    }

    /// Number of requests awaiting a reply
    pub fn pending_count(&self) -> usize {
        self.table.len()
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<PerfMetrics> {
        &self.metrics
    }
}

enum MeasurementState {
    Pending(ResultReceiver),
    Failed(Option<ProtocolError>),
}

/// Result of one `measure()` call, resolving to the round-trip time
#[must_use = "a measurement does nothing unless awaited"]
pub struct Measurement {
    id: Option<CorrelationId>,
    state: MeasurementState,
}

impl Measurement {
    fn pending(id: CorrelationId, rx: ResultReceiver) -> Self {
        Self {
            id: Some(id),
            state: MeasurementState::Pending(rx),
        }
    }

    pub(crate) fn failed(error: ProtocolError) -> Self {
        Self {
            id: None,
            state: MeasurementState::Failed(Some(error)),
        }
    }

    /// Correlation id of the request, if one was sent
    pub fn correlation_id(&self) -> Option<CorrelationId> {
        self.id
    }
}

impl Future for Measurement {
    type Output = Result<Duration>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            MeasurementState::Pending(rx) => Pin::new(rx)
                .poll(cx)
                .map(|res| res.unwrap_or(Err(ProtocolError::ConnectionClosed))),
            MeasurementState::Failed(err) => {
                Poll::Ready(Err(err.take().unwrap_or(ProtocolError::ConnectionClosed)))
            }
        }
    }
}

impl std::fmt::Debug for Measurement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Measurement")
            .field("id", &self.id)
            .field("pending", &matches!(self.state, MeasurementState::Pending(_)))
            .finish()
    }
}
