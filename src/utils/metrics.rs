//! Observability and Metrics
//!
//! Per-binding counters for perf traffic. Uses atomic counters so the driver,
//! timer tasks and callers can record concurrently.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::info;

/// Counters for one perf binding
#[derive(Debug)]
pub struct PerfMetrics {
    /// Requests written by the initiator
    pub requests_sent: AtomicU64,
    /// Replies matched to a pending request
    pub replies_received: AtomicU64,
    /// Replies written by the responder
    pub replies_sent: AtomicU64,
    /// Requests failed by their deadline
    pub timeouts: AtomicU64,
    /// Requests failed because the stream closed
    pub closed_failures: AtomicU64,
    /// Replies with an unknown or settled correlation id
    pub protocol_violations: AtomicU64,
    /// Payloads too short to carry a correlation prefix
    pub framing_errors: AtomicU64,
    /// Payload bytes written
    pub bytes_sent: AtomicU64,
    /// Payload bytes read
    pub bytes_received: AtomicU64,
    /// Sum of matched round trips, in microseconds
    pub round_trip_micros: AtomicU64,
    start_time: Instant,
}

/// Point-in-time copy of [`PerfMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub requests_sent: u64,
    pub replies_received: u64,
    pub replies_sent: u64,
    pub timeouts: u64,
    pub closed_failures: u64,
    pub protocol_violations: u64,
    pub framing_errors: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub round_trip_micros: u64,
    pub uptime_secs: u64,
}

impl PerfMetrics {
    pub fn new() -> Self {
        Self {
            requests_sent: AtomicU64::new(0),
            replies_received: AtomicU64::new(0),
            replies_sent: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            closed_failures: AtomicU64::new(0),
            protocol_violations: AtomicU64::new(0),
            framing_errors: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            round_trip_micros: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn request_sent(&self, byte_count: usize) {
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count as u64, Ordering::Relaxed);
    }

    pub fn reply_sent(&self, byte_count: usize) {
        self.replies_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count as u64, Ordering::Relaxed);
    }

    pub fn frame_received(&self, byte_count: usize) {
        self.bytes_received.fetch_add(byte_count as u64, Ordering::Relaxed);
    }

    pub fn reply_matched(&self, round_trip: Duration) {
        self.replies_received.fetch_add(1, Ordering::Relaxed);
        let micros = u64::try_from(round_trip.as_micros()).unwrap_or(u64::MAX);
        self.round_trip_micros.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn timed_out(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn failed_on_close(&self, count: usize) {
        self.closed_failures.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn protocol_violation(&self) {
        self.protocol_violations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn framing_error(&self) {
        self.framing_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Mean round trip over all matched replies
    pub fn mean_round_trip(&self) -> Option<Duration> {
        let count = self.replies_received.load(Ordering::Relaxed);
        if count == 0 {
            return None;
        }
        let total = self.round_trip_micros.load(Ordering::Relaxed);
        Some(Duration::from_micros(total / count))
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            replies_received: self.replies_received.load(Ordering::Relaxed),
            replies_sent: self.replies_sent.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            closed_failures: self.closed_failures.load(Ordering::Relaxed),
            protocol_violations: self.protocol_violations.load(Ordering::Relaxed),
            framing_errors: self.framing_errors.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            round_trip_micros: self.round_trip_micros.load(Ordering::Relaxed),
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log a one-line summary at info level
    pub fn log_summary(&self) {
        let s = self.snapshot();
        info!(
            requests_sent = s.requests_sent,
            replies_received = s.replies_received,
            replies_sent = s.replies_sent,
            timeouts = s.timeouts,
            closed_failures = s.closed_failures,
            protocol_violations = s.protocol_violations,
            framing_errors = s.framing_errors,
            bytes_sent = s.bytes_sent,
            bytes_received = s.bytes_received,
            mean_rtt_us = self.mean_round_trip().map(|d| d.as_micros() as u64),
            "Perf stream summary"
        );
    }
}

impl Default for PerfMetrics {
    fn default() -> Self {
        Self::new()
    }
}
