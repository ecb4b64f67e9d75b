//! Table of outstanding perf requests.
//!
//! One mutex guards both the entries and the closed flag. Every path that
//! settles a request (reply, deadline, close) removes the entry under that
//! lock before touching its result slot, so exactly one of them wins.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::core::correlation::CorrelationId;
use crate::error::{ProtocolError, Result};
use crate::utils::scheduler::Deadline;
use crate::utils::time::elapsed_between;

/// Receiving side of a request's result slot
pub type ResultReceiver = oneshot::Receiver<Result<Duration>>;

struct PendingEntry {
    sent_at: Instant,
    slot: oneshot::Sender<Result<Duration>>,
    deadline: Deadline,
}

#[derive(Default)]
struct TableState {
    closed: bool,
    entries: HashMap<CorrelationId, PendingEntry>,
}

/// Outcome of [`PendingTable::register`]
#[derive(Debug)]
pub enum Registration {
    /// Entry stored; the receiver resolves when the request settles
    Registered(ResultReceiver),
    /// The id is already outstanding
    Duplicate,
    /// The table was closed
    Closed,
}

/// Outstanding requests of one initiator
#[derive(Default)]
pub struct PendingTable {
    state: Mutex<TableState>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    // Entries are only ever moved in or out whole, so a poisoned guard still
    // holds a consistent map.
    fn lock(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a new entry.
    ///
    /// `arm` runs under the table lock and must not settle the entry itself;
    /// a deadline action that fires later takes the lock like any other path.
    pub fn register<F>(&self, id: CorrelationId, sent_at: Instant, arm: F) -> Registration
    where
        F: FnOnce(CorrelationId) -> Deadline,
    {
        let mut state = self.lock();
        if state.closed {
            return Registration::Closed;
        }

        match state.entries.entry(id) {
            Entry::Occupied(_) => Registration::Duplicate,
            Entry::Vacant(vacant) => {
                let (slot, rx) = oneshot::channel();
                let deadline = arm(id);
                vacant.insert(PendingEntry {
                    sent_at,
                    slot,
                    deadline,
                });
                trace!(%id, "Registered perf request");
                Registration::Registered(rx)
            }
        }
    }

    /// Settle `id` with the time elapsed since it was sent.
    ///
    /// An id that is not outstanding is a protocol violation.
    pub fn resolve(&self, id: CorrelationId, now: Instant) -> Result<Duration> {
        let entry = self
            .lock()
            .entries
            .remove(&id)
            .ok_or(ProtocolError::ProtocolViolation(id))?;

        entry.deadline.cancel();
        let elapsed = elapsed_between(entry.sent_at, now);
        if entry.slot.send(Ok(elapsed)).is_err() {
            debug!(%id, "Perf result dropped by caller");
        }
        Ok(elapsed)
    }

    /// Fail `id` with [`ProtocolError::Timeout`] if it is still outstanding
    pub fn expire(&self, id: CorrelationId) -> bool {
        let Some(entry) = self.lock().entries.remove(&id) else {
            return false;
        };
        let _ = entry.slot.send(Err(ProtocolError::Timeout));
        true
    }

    /// Mark the table closed and fail everything outstanding.
    ///
    /// Returns the number of failed entries on the first call, `None` after.
    pub fn close(&self) -> Option<usize> {
        let drained: Vec<_> = {
            let mut state = self.lock();
            if state.closed {
                return None;
            }
            state.closed = true;
            state.entries.drain().collect()
        };

        let count = drained.len();
        for (_, entry) in drained {
            entry.deadline.cancel();
            let _ = entry.slot.send(Err(ProtocolError::ConnectionClosed));
        }
        Some(count)
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: CorrelationId) -> bool {
        self.lock().entries.contains_key(&id)
    }
}
