//! The [`WorkerPool`] handle.
//!
//! Every worker pulls from one shared unbounded queue, so submission never
//! waits and an idle worker always picks up the next job. Every submitted job is tracked as in flight from
//! submission until it finishes or is dropped, which is what the graceful
//! drain in [`WorkerPool::shutdown`] waits on.

use super::{WorkRequest, worker::worker_loop};
use crate::{Error, Result};
use core::{future::Future, time::Duration};
use futures::FutureExt;
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};
use tokio::{
    sync::{Mutex, mpsc, oneshot},
    time::{sleep, timeout},
};
use tokio_util::sync::CancellationToken;

/// How long each worker gets to acknowledge a shutdown request.
const WORKER_ACK_TIMEOUT: Duration = Duration::from_secs(3);

/// Polling period while waiting for in-flight jobs to drain.
const DRAIN_POLL: Duration = Duration::from_millis(10);

/// How a [`WorkerPool::shutdown`] ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrainOutcome {
    /// Every in-flight job finished within the grace period.
    pub drained: bool,
    /// Jobs still in flight when the remaining work was cancelled.
    pub abandoned: usize,
}

/// Decrements the in-flight count when a job finishes or is dropped.
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A fixed-size pool of asynchronous workers.
///
/// Supports graceful, then forced, shutdown through a shared
/// [`CancellationToken`].
pub struct WorkerPool {
    name: &'static str,
    size: usize,
    queue: mpsc::UnboundedSender<WorkRequest>,
    accepting: AtomicBool,
    in_flight: Arc<AtomicUsize>,
    shutdown_token: CancellationToken,
}

impl WorkerPool {
    /// Spawns `size` workers on the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `size` is zero.
    pub fn spawn(name: &'static str, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::invalid_argument(format!(
                "{name} pool needs at least one worker"
            )));
        }

        let shutdown_token = CancellationToken::new();
        let (queue, rx) = mpsc::unbounded_channel();
        let rx = Arc::new(Mutex::new(rx));
        for worker_id in 0..size {
            tokio::spawn(worker_loop(
                name,
                worker_id,
                Arc::clone(&rx),
                shutdown_token.clone(),
            ));
        }

        tracing::debug!("Spawned {name} pool with {size} workers");
        Ok(Self {
            name,
            size,
            queue,
            accepting: AtomicBool::new(true),
            in_flight: Arc::new(AtomicUsize::new(0)),
            shutdown_token,
        })
    }

    pub const fn size(&self) -> usize {
        self.size
    }

    /// Jobs submitted and not yet finished or dropped.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire) && !self.shutdown_token.is_cancelled()
    }

    /// Queues `job` for the next free worker without waiting.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The pool is shutting down ([`Error::ServiceShutdown`]).
    /// - The queue is closed.
    pub fn submit<F>(&self, job: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if !self.is_accepting() {
            return Err(Error::ServiceShutdown);
        }

        let guard = InFlight::enter(&self.in_flight);
        let job = async move {
            let _guard = guard;
            job.await;
        }
        .boxed();

        self.queue
            .send(WorkRequest::Run { job })
            .map_err(|_| Error::ChannelError {
                context: format!("{} pool queue closed", self.name),
            })
    }

    /// Cancels all remaining work immediately.
    pub fn cancel(&self) {
        self.accepting.store(false, Ordering::Release);
        self.shutdown_token.cancel();
    }

    /// Shuts the pool down in phases.
    ///
    /// - Refuses new submissions.
    /// - Waits up to `grace` for in-flight jobs to finish.
    /// - Cancels whatever is still running or queued.
    /// - Queues one [`WorkRequest::Shutdown`] per worker and waits up to 3
    ///   seconds for each acknowledgement. Cancelled jobs ahead of them in
    ///   the queue are dropped unpolled.
    pub async fn shutdown(&self, grace: Duration) -> DrainOutcome {
        // === Phase 0: Stop accepting new work ===
        tracing::debug!("{} pool refusing new work", self.name);
        self.accepting.store(false, Ordering::Release);

        // === Phase 1: Wait for in-flight jobs to drain ===
        tracing::debug!(
            "Draining {} pool ({} jobs in flight)",
            self.name,
            self.in_flight()
        );
        let drained = timeout(grace, async {
            while self.in_flight() > 0 {
                sleep(DRAIN_POLL).await;
            }
        })
        .await
        .is_ok();

        let abandoned = if drained {
            tracing::debug!("All {} jobs drained", self.name);
            0
        } else {
            let abandoned = self.in_flight();
            tracing::warn!(
                "{} pool drain timed out after {grace:?} ({abandoned} jobs still in flight)",
                self.name
            );
            abandoned
        };

        // === Phase 2: Cancel any remaining work ===
        self.shutdown_token.cancel();

        // === Phase 3: Notify workers to shut down ===
        let mut acks = Vec::with_capacity(self.size);
        for i in 0..self.size {
            let (tx, rx) = oneshot::channel();
            if self.queue.send(WorkRequest::Shutdown { response: tx }).is_err() {
                tracing::trace!("{} workers already stopped", self.name);
                break;
            }
            acks.push((i, rx));
        }

        let name = self.name;
        let ack_futures = acks.into_iter().map(|(i, rx)| async move {
            match timeout(WORKER_ACK_TIMEOUT, rx).await {
                Ok(Ok(())) => tracing::trace!("{name} worker {i} shutdown acknowledged"),
                Ok(Err(e)) => tracing::error!("{name} worker {i} returned error: {e}"),
                Err(_) => tracing::warn!("{name} worker {i} shutdown timed out"),
            }
        });
        futures::future::join_all(ack_futures).await;

        tracing::debug!("{} pool shutdown complete", self.name);
        DrainOutcome { drained, abandoned }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn runs_every_submitted_job() {
        let pool = WorkerPool::spawn("test", 3).unwrap();
        let done = Arc::new(AtomicU64::new(0));

        for _ in 0..30 {
            let done = Arc::clone(&done);
            pool.submit(async move {
                done.fetch_add(1, Ordering::AcqRel);
            })
            .unwrap();
        }

        let outcome = pool.shutdown(Duration::from_secs(5)).await;
        assert!(outcome.drained);
        assert_eq!(outcome.abandoned, 0);
        assert_eq!(done.load(Ordering::Acquire), 30);
    }

    #[tokio::test]
    async fn panicking_job_does_not_stop_its_siblings() {
        let pool = WorkerPool::spawn("test", 1).unwrap();
        let done = Arc::new(AtomicU64::new(0));

        pool.submit(async {
            panic!("poisoned partition");
        })
        .unwrap();
        for _ in 0..3 {
            let done = Arc::clone(&done);
            pool.submit(async move {
                done.fetch_add(1, Ordering::AcqRel);
            })
            .unwrap();
        }

        assert!(pool.shutdown(Duration::from_secs(5)).await.drained);
        assert_eq!(done.load(Ordering::Acquire), 3);
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test]
    async fn submissions_are_refused_after_shutdown() {
        let pool = WorkerPool::spawn("test", 2).unwrap();
        pool.shutdown(Duration::from_millis(10)).await;

        let err = pool.submit(async {}).unwrap_err();
        assert!(matches!(err, Error::ServiceShutdown));
    }

    #[tokio::test]
    async fn stuck_jobs_are_cancelled_after_grace() {
        let pool = WorkerPool::spawn("test", 2).unwrap();
        let never = Arc::new(Notify::new());
        for _ in 0..2 {
            let never = Arc::clone(&never);
            pool.submit(async move { never.notified().await }).unwrap();
        }

        let outcome = pool.shutdown(Duration::from_millis(50)).await;

        assert!(!outcome.drained);
        assert_eq!(outcome.abandoned, 2);
        // Cancelled jobs are dropped, which releases their in-flight slot.
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test]
    async fn stalled_job_does_not_hold_up_the_queue() {
        let pool = WorkerPool::spawn("test", 2).unwrap();
        let never = Arc::new(Notify::new());
        let done = Arc::new(AtomicU64::new(0));

        let stalled = Arc::clone(&never);
        pool.submit(async move { stalled.notified().await }).unwrap();
        for _ in 0..10 {
            let done = Arc::clone(&done);
            pool.submit(async move {
                done.fetch_add(1, Ordering::AcqRel);
            })
            .unwrap();
        }

        timeout(Duration::from_secs(5), async {
            while done.load(Ordering::Acquire) < 10 {
                sleep(DRAIN_POLL).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(pool.in_flight(), 1);

        let outcome = pool.shutdown(Duration::from_millis(20)).await;
        assert_eq!(outcome.abandoned, 1);
    }

    #[test]
    fn zero_workers_is_rejected() {
        assert!(matches!(
            WorkerPool::spawn("test", 0),
            Err(Error::InvalidArgument { .. })
        ));
    }
}
