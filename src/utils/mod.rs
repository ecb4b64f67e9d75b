//! # Utility Modules
//!
//! Supporting utilities for timing, deadlines, logging and metrics.
//!
//! ## Components
//! - **Time**: Injectable clock sources for round-trip measurement
//! - **Scheduler**: Cancellable one-shot deadlines, owned per initiator
//! - **Logging**: Structured logging configuration
//! - **Metrics**: Thread-safe per-binding counters

pub mod logging;
pub mod metrics;
pub mod scheduler;
pub mod time;

pub use metrics::{MetricsSnapshot, PerfMetrics};
pub use scheduler::{Deadline, Scheduler, TokioScheduler};
pub use time::{Clock, ManualClock, SystemClock};
