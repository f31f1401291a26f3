//! The consumer's pool lifecycle as an explicit state machine.
//!
//! ```text
//! Idle --init / first batch--> Running --shutdown--> Draining --drained--> Idle
//! ```
//!
//! All transitions happen under one mutex. The pool itself is shared out as
//! an `Arc` so submissions never hold the lock.

use crate::{Error, Result, pool::WorkerPool};
use parking_lot::Mutex;
use std::sync::Arc;

/// Observable phase of a [`Lifecycle`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Running,
    Draining,
}

enum State {
    Idle,
    Running(Arc<WorkerPool>),
    Draining,
}

/// Owns the consumer's worker pool across init/shutdown cycles.
pub struct Lifecycle {
    state: Mutex<State>,
    workers: usize,
}

impl Lifecycle {
    pub fn new(workers: usize) -> Self {
        Self {
            state: Mutex::new(State::Idle),
            workers,
        }
    }

    pub fn phase(&self) -> Phase {
        match *self.state.lock() {
            State::Idle => Phase::Idle,
            State::Running(_) => Phase::Running,
            State::Draining => Phase::Draining,
        }
    }

    /// Returns the running pool, starting one if idle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConsumerDraining`] while a shutdown is in progress,
    /// or the pool creation error.
    pub fn ensure_running(&self) -> Result<Arc<WorkerPool>> {
        let mut state = self.state.lock();
        match &*state {
            State::Running(pool) => Ok(Arc::clone(pool)),
            State::Draining => Err(Error::ConsumerDraining),
            State::Idle => {
                let pool = Arc::new(WorkerPool::spawn("consumer", self.workers)?);
                tracing::info!(
                    workers = self.workers,
                    "Bulk voucher consumer initialized"
                );
                *state = State::Running(Arc::clone(&pool));
                Ok(pool)
            }
        }
    }

    /// Moves a running lifecycle to draining and hands back its pool.
    ///
    /// Returns `None` if there is nothing to drain.
    pub fn begin_drain(&self) -> Option<Arc<WorkerPool>> {
        let mut state = self.state.lock();
        match core::mem::replace(&mut *state, State::Draining) {
            State::Running(pool) => Some(pool),
            previous => {
                *state = previous;
                None
            }
        }
    }

    /// Completes a drain started by [`Lifecycle::begin_drain`].
    pub fn finish_drain(&self) {
        let mut state = self.state.lock();
        if matches!(*state, State::Draining) {
            *state = State::Idle;
        }
    }
}
