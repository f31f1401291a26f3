//! Bounded pools of asynchronous workers.
//!
//! Both sides of the pipeline run their work on a [`WorkerPool`]: generation
//! and publishing on one, persistence on another. A pool is a fixed set of
//! Tokio tasks pulling [`WorkRequest`]s from one shared queue, one at a
//! time, so a pool of `n` workers never runs more than `n` jobs at once.
//!
//! ## Submodules
//!
//! - [`manager`] - The pool handle: shared-queue dispatch, in-flight tracking
//!   and phased shutdown.
//! - [`worker`] - The per-worker loop.

pub mod manager;
pub mod worker;

use futures::future::BoxFuture;
use tokio::sync::oneshot;

pub use manager::{DrainOutcome, WorkerPool};

/// A unit of work sent to a pool worker.
pub enum WorkRequest {
    /// Run `job` to completion, unless the pool is cancelled first.
    Run { job: BoxFuture<'static, ()> },
    /// Stop the worker and acknowledge on `response`.
    Shutdown { response: oneshot::Sender<()> },
}
