use super::WorkRequest;
use core::{any::Any, panic::AssertUnwindSafe};
use futures::FutureExt;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

/// Worker task processing [`WorkRequest`]s from the pool's shared queue
/// until shut down.
///
/// Jobs run one at a time, and the queue lock is only held while waiting for
/// the next request. Once `shutdown_token` is cancelled, the running
/// job is dropped at its next await point and every job still queued is
/// dropped without being polled. A panicking job is logged and does not take
/// the worker down.
pub async fn worker_loop(
    pool: &'static str,
    worker_id: usize,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<WorkRequest>>>,
    shutdown_token: CancellationToken,
) {
    tracing::trace!("{pool} worker {worker_id} started");

    loop {
        let Some(work) = rx.lock().await.recv().await else {
            break;
        };
        match work {
            WorkRequest::Run { job } => {
                tokio::select! {
                    biased;
                    () = shutdown_token.cancelled() => {
                        tracing::trace!("{pool} worker {worker_id} dropped a cancelled job");
                    }
                    result = AssertUnwindSafe(job).catch_unwind() => {
                        if let Err(panic) = result {
                            tracing::error!(
                                "{pool} worker {worker_id} job panicked: {}",
                                panic_message(&*panic)
                            );
                        }
                    }
                }
            }
            WorkRequest::Shutdown { response } => {
                tracing::debug!("{pool} worker {worker_id} received shutdown signal");

                if response.send(()).is_err() {
                    tracing::error!("{pool} worker {worker_id} failed to acknowledge shutdown");
                }
                break;
            }
        }
    }

    tracing::trace!("{pool} worker {worker_id} stopped");
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
