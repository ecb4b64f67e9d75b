//! Deadline scheduling for outstanding perf requests.
//!
//! A [`Scheduler`] runs one deferred action per request and can cancel it.
//! Each initiator owns its scheduler: it is created with the state machine and
//! shut down exactly once when the stream closes, after which no action
//! fires.
//!
//! ## Usage
//! ```ignore
//! let scheduler = TokioScheduler::new();
//! let deadline = scheduler.schedule(Duration::from_secs(5), Box::new(|| warn!("late")));
//! // reply arrived in time
//! deadline.cancel();
//! scheduler.shutdown();
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Action run when a deadline expires
pub type DeadlineAction = Box<dyn FnOnce() + Send + 'static>;

/// Builds one scheduler per initiator
pub type SchedulerFactory = Arc<dyn Fn() -> Arc<dyn Scheduler> + Send + Sync>;

/// Handle to one scheduled action
pub struct Deadline {
    cancel: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl Deadline {
    /// Deadline cancelled by running `cancel`
    pub fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Deadline with nothing to cancel (the action will never run)
    pub fn inert() -> Self {
        Self { cancel: None }
    }

    /// Prevent the action from running if it has not already
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Deadline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deadline")
            .field("armed", &self.cancel.is_some())
            .finish()
    }
}

/// One-shot deferred actions with cancellation
pub trait Scheduler: Send + Sync {
    /// Run `action` after `delay` unless cancelled or shut down first.
    ///
    /// Callers may hold a lock that `action` also takes, so `action` must
    /// never run inside `schedule` itself, even for a zero `delay`.
    fn schedule(&self, delay: Duration, action: DeadlineAction) -> Deadline;

    /// Stop every outstanding action; later schedules never fire
    fn shutdown(&self);

    fn is_shut_down(&self) -> bool;
}

/// Scheduler running each deadline as a Tokio sleep task
#[derive(Debug)]
pub struct TokioScheduler {
    handle: Handle,
    shutdown: CancellationToken,
}

impl TokioScheduler {
    /// Scheduler on the current Tokio runtime.
    ///
    /// # Panics
    /// Panics when called outside a Tokio runtime.
    pub fn new() -> Self {
        Self::with_handle(Handle::current())
    }

    pub fn with_handle(handle: Handle) -> Self {
        Self {
            handle,
            shutdown: CancellationToken::new(),
        }
    }

    /// Factory producing a fresh [`TokioScheduler`] per initiator
    pub fn factory() -> SchedulerFactory {
        Arc::new(|| Arc::new(TokioScheduler::new()) as Arc<dyn Scheduler>)
    }
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, action: DeadlineAction) -> Deadline {
        if self.shutdown.is_cancelled() {
            return Deadline::inert();
        }

        let shutdown = self.shutdown.clone();
        let task = self.handle.spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => action(),
            }
        });
        let abort = task.abort_handle();
        Deadline::new(move || abort.abort())
    }

    fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            debug!("Shutting down deadline scheduler");
            self.shutdown.cancel();
        }
    }

    fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
