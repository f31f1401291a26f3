//! Publish-side batch accumulation.
//!
//! [`BatchingTemplate`] sits in front of a [`Channel`] and groups submitted
//! messages per destination. A group is sent as one wire-level batch when it
//! reaches `max_count` messages, when the next message would push it past
//! `max_bytes`, or when it has been open for `max_wait`.
//!
//! A successful [`BatchingTemplate::submit`] only means the message was
//! accepted into a group. Delivery happens later, and a failed timed flush is
//! only visible in the logs.

use super::{Channel, Destination};
use crate::Result;
use bytes::Bytes;
use core::time::Duration;
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};
use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

/// Thresholds that close an outgoing batch.
#[derive(Clone, Copy, Debug)]
pub struct BatchingStrategy {
    pub max_count: usize,
    pub max_bytes: usize,
    pub max_wait: Duration,
}

#[derive(Default)]
struct PendingBatch {
    messages: Vec<Bytes>,
    bytes: usize,
    opened: Option<Instant>,
}

impl PendingBatch {
    fn take(&mut self) -> Vec<Bytes> {
        self.bytes = 0;
        self.opened = None;
        core::mem::take(&mut self.messages)
    }
}

/// Outcome of adding one message under the lock.
enum Submit {
    Queued,
    /// The batch now holding the message is full.
    Closed(Vec<Bytes>),
    /// The open batch was closed without the message.
    Overflowed(Vec<Bytes>),
}

type Pending = Arc<Mutex<HashMap<Destination, PendingBatch>>>;

/// Accumulates outgoing messages into wire-level batches.
pub struct BatchingTemplate {
    channel: Arc<dyn Channel>,
    strategy: BatchingStrategy,
    pending: Pending,
    shutdown_token: CancellationToken,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl BatchingTemplate {
    /// Creates the template and spawns its timed flusher.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(channel: Arc<dyn Channel>, strategy: BatchingStrategy) -> Self {
        let strategy = BatchingStrategy {
            max_count: strategy.max_count.max(1),
            max_bytes: strategy.max_bytes.max(1),
            max_wait: strategy.max_wait.max(Duration::from_millis(1)),
        };
        let pending: Pending = Arc::default();
        let shutdown_token = CancellationToken::new();
        let flusher = tokio::spawn(flush_loop(
            Arc::clone(&channel),
            Arc::clone(&pending),
            strategy.max_wait,
            shutdown_token.clone(),
        ));

        Self {
            channel,
            strategy,
            pending,
            shutdown_token,
            flusher: Mutex::new(Some(flusher)),
        }
    }

    pub const fn strategy(&self) -> &BatchingStrategy {
        &self.strategy
    }

    /// Adds `message` to the open batch for `destination`, sending whatever
    /// batch the addition closes.
    ///
    /// When `message` would overflow the byte limit, the open batch is sent
    /// first and `message` is only added once that send succeeds.
    ///
    /// # Errors
    ///
    /// Returns the channel error if sending a closed batch fails. The batch
    /// that failed is dropped. `message` is never left pending on error: it
    /// was either part of the failed batch or never added.
    pub async fn submit(&self, destination: &Destination, message: Bytes) -> Result<()> {
        loop {
            let step = {
                let mut pending = self.pending.lock();
                let batch = pending.entry(destination.clone()).or_default();
                if !batch.messages.is_empty()
                    && batch.bytes + message.len() > self.strategy.max_bytes
                {
                    Submit::Overflowed(batch.take())
                } else {
                    batch.bytes += message.len();
                    batch.messages.push(message.clone());
                    batch.opened.get_or_insert_with(Instant::now);
                    if batch.messages.len() >= self.strategy.max_count
                        || batch.bytes >= self.strategy.max_bytes
                    {
                        Submit::Closed(batch.take())
                    } else {
                        Submit::Queued
                    }
                }
            };

            match step {
                Submit::Queued => return Ok(()),
                Submit::Closed(messages) => {
                    return self.channel.send_batch(destination, messages).await;
                }
                // Another submitter may refill the batch before the lock is
                // taken again, so the overflow check is repeated.
                Submit::Overflowed(messages) => {
                    self.channel.send_batch(destination, messages).await?;
                }
            }
        }
    }

    /// Sends every open batch now.
    pub async fn flush(&self) -> Result<()> {
        let ready = drain_all(&self.pending);
        for (destination, messages) in ready {
            self.channel.send_batch(&destination, messages).await?;
        }
        Ok(())
    }

    /// Number of messages accepted but not yet sent.
    pub fn pending_messages(&self) -> usize {
        self.pending
            .lock()
            .values()
            .map(|batch| batch.messages.len())
            .sum()
    }

    /// Flushes open batches and stops the timed flusher.
    pub async fn close(&self) -> Result<()> {
        self.shutdown_token.cancel();
        let flusher = self.flusher.lock().take();
        if let Some(flusher) = flusher {
            if let Err(e) = flusher.await {
                tracing::warn!("Batch flusher ended abnormally: {e}");
            }
        }
        self.flush().await
    }
}

impl Drop for BatchingTemplate {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
    }
}

fn drain_all(pending: &Pending) -> Vec<(Destination, Vec<Bytes>)> {
    pending
        .lock()
        .iter_mut()
        .filter(|(_, batch)| !batch.messages.is_empty())
        .map(|(destination, batch)| (destination.clone(), batch.take()))
        .collect()
}

fn drain_expired(pending: &Pending, max_wait: Duration) -> Vec<(Destination, Vec<Bytes>)> {
    let now = Instant::now();
    pending
        .lock()
        .iter_mut()
        .filter(|(_, batch)| {
            batch
                .opened
                .is_some_and(|opened| now.duration_since(opened) >= max_wait)
        })
        .map(|(destination, batch)| (destination.clone(), batch.take()))
        .collect()
}

async fn flush_loop(
    channel: Arc<dyn Channel>,
    pending: Pending,
    max_wait: Duration,
    shutdown_token: CancellationToken,
) {
    let tick = (max_wait / 4).max(Duration::from_millis(1));
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = shutdown_token.cancelled() => break,
            _ = interval.tick() => {}
        }

        for (destination, messages) in drain_expired(&pending, max_wait) {
            let count = messages.len();
            if let Err(e) = channel.send_batch(&destination, messages).await {
                tracing::warn!(%destination, count, "Timed batch flush failed: {e}");
            } else {
                tracing::trace!(%destination, count, "Flushed incomplete batch");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::InMemoryChannel;

    fn destination() -> Destination {
        Destination::new("x", "k")
    }

    fn template(channel: &Arc<InMemoryChannel>, max_count: usize, max_bytes: usize) -> BatchingTemplate {
        BatchingTemplate::new(
            channel.clone(),
            BatchingStrategy {
                max_count,
                max_bytes,
                max_wait: Duration::from_secs(3600),
            },
        )
    }

    #[tokio::test]
    async fn full_batches_are_sent_immediately() {
        let channel = Arc::new(InMemoryChannel::new());
        let template = template(&channel, 3, 1024);

        for _ in 0..7 {
            template
                .submit(&destination(), Bytes::from_static(b"m"))
                .await
                .unwrap();
        }

        assert_eq!(channel.enqueued(&destination()), 6);
        assert_eq!(template.pending_messages(), 1);
        template.close().await.unwrap();
        assert_eq!(channel.enqueued(&destination()), 7);
    }

    #[tokio::test]
    async fn byte_limit_closes_batch_before_overflow() {
        let channel = Arc::new(InMemoryChannel::new());
        let template = template(&channel, 100, 10);

        template
            .submit(&destination(), Bytes::from_static(b"123456"))
            .await
            .unwrap();
        assert_eq!(channel.enqueued(&destination()), 0);
        template
            .submit(&destination(), Bytes::from_static(b"123456"))
            .await
            .unwrap();
        assert_eq!(channel.enqueued(&destination()), 1);
        assert_eq!(template.pending_messages(), 1);
    }

    /// Fails every wire-level batch.
    struct RejectingChannel;

    #[async_trait::async_trait]
    impl Channel for RejectingChannel {
        async fn send(&self, _: &Destination, _: Bytes) -> Result<()> {
            Ok(())
        }

        async fn send_batch(&self, _: &Destination, _: Vec<Bytes>) -> Result<()> {
            Err(crate::Error::ChannelError {
                context: "connection reset".to_string(),
            })
        }

        fn subscribe(
            &self,
            _: &Destination,
            _: crate::channel::ListenerConfig,
            _: crate::channel::BatchHandler,
        ) -> Result<crate::channel::Subscription> {
            Err(crate::Error::ChannelError {
                context: "not supported".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn failed_overflow_send_leaves_message_unqueued() {
        let template = BatchingTemplate::new(
            Arc::new(RejectingChannel),
            BatchingStrategy {
                max_count: 100,
                max_bytes: 10,
                max_wait: Duration::from_secs(3600),
            },
        );

        template
            .submit(&destination(), Bytes::from_static(b"123456"))
            .await
            .unwrap();
        let result = template
            .submit(&destination(), Bytes::from_static(b"abcdef"))
            .await;

        assert!(result.is_err());
        assert_eq!(template.pending_messages(), 0);
    }

    #[tokio::test]
    async fn failed_full_batch_send_drops_the_message_with_it() {
        let template = BatchingTemplate::new(
            Arc::new(RejectingChannel),
            BatchingStrategy {
                max_count: 2,
                max_bytes: 1024,
                max_wait: Duration::from_secs(3600),
            },
        );

        template
            .submit(&destination(), Bytes::from_static(b"a"))
            .await
            .unwrap();
        assert!(template.submit(&destination(), Bytes::from_static(b"b")).await.is_err());
        assert_eq!(template.pending_messages(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn incomplete_batch_is_flushed_after_max_wait() {
        let channel = Arc::new(InMemoryChannel::new());
        let template = BatchingTemplate::new(
            channel.clone(),
            BatchingStrategy {
                max_count: 100,
                max_bytes: 1024,
                max_wait: Duration::from_millis(200),
            },
        );

        template
            .submit(&destination(), Bytes::from_static(b"late"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(channel.enqueued(&destination()), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(channel.enqueued(&destination()), 1);
        assert_eq!(template.pending_messages(), 0);
    }
}
