//! In-process message broker.
//!
//! Each [`Destination`] maps to one unbounded queue, created on first use by
//! either a publisher or a subscriber. Listener tasks compete for the queue:
//! one listener at a time takes the first message, keeps collecting until the
//! group is full or the receive timeout runs out, then hands the group to the
//! subscriber's handler.

use super::{BatchHandler, Channel, Destination, ListenerConfig, Subscription};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use portable_atomic::{AtomicU64, Ordering};
use std::{collections::HashMap, sync::Arc};
use tokio::{
    sync::{Mutex as AsyncMutex, mpsc},
    time::{Instant, timeout_at},
};
use tokio_util::sync::CancellationToken;

struct Queue {
    tx: mpsc::UnboundedSender<Bytes>,
    rx: AsyncMutex<mpsc::UnboundedReceiver<Bytes>>,
    enqueued: AtomicU64,
    delivered: AtomicU64,
}

impl Queue {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: AsyncMutex::new(rx),
            enqueued: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
        }
    }

    fn push(&self, message: Bytes) -> Result<()> {
        self.tx.send(message).map_err(|_| Error::ChannelError {
            context: "queue receiver dropped".to_string(),
        })?;
        self.enqueued.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Waits for the next group of messages.
    ///
    /// Cancellation is only observed while waiting for the first message, so
    /// a group that has started filling is never lost. Returns `None` once
    /// cancelled.
    async fn next_batch(
        &self,
        config: &ListenerConfig,
        token: &CancellationToken,
    ) -> Option<Vec<Bytes>> {
        let mut rx = tokio::select! {
            () = token.cancelled() => return None,
            rx = self.rx.lock() => rx,
        };
        let first = tokio::select! {
            () = token.cancelled() => return None,
            first = rx.recv() => first?,
        };

        let mut batch = Vec::with_capacity(config.batch_size.max(1));
        batch.push(first);
        let deadline = Instant::now() + config.receive_timeout;
        while batch.len() < config.batch_size {
            // Drain what is already queued before waiting on the clock.
            match rx.try_recv() {
                Ok(message) => batch.push(message),
                Err(_) => match timeout_at(deadline, rx.recv()).await {
                    Ok(Some(message)) => batch.push(message),
                    Ok(None) | Err(_) => break,
                },
            }
        }
        self.delivered
            .fetch_add(batch.len() as u64, Ordering::AcqRel);
        Some(batch)
    }

    fn depth(&self) -> u64 {
        self.enqueued
            .load(Ordering::Acquire)
            .saturating_sub(self.delivered.load(Ordering::Acquire))
    }
}

/// A [`Channel`] backed by in-process queues.
#[derive(Default)]
pub struct InMemoryChannel {
    queues: Mutex<HashMap<Destination, Arc<Queue>>>,
}

impl InMemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self, destination: &Destination) -> Arc<Queue> {
        let mut queues = self.queues.lock();
        Arc::clone(
            queues
                .entry(destination.clone())
                .or_insert_with(|| Arc::new(Queue::new())),
        )
    }

    /// Messages waiting in the queue behind `destination`.
    pub fn depth(&self, destination: &Destination) -> u64 {
        self.queues
            .lock()
            .get(destination)
            .map_or(0, |queue| queue.depth())
    }

    /// Total messages ever enqueued for `destination`.
    pub fn enqueued(&self, destination: &Destination) -> u64 {
        self.queues
            .lock()
            .get(destination)
            .map_or(0, |queue| queue.enqueued.load(Ordering::Acquire))
    }
}

#[async_trait]
impl Channel for InMemoryChannel {
    async fn send(&self, destination: &Destination, message: Bytes) -> Result<()> {
        self.queue(destination).push(message)
    }

    async fn send_batch(&self, destination: &Destination, messages: Vec<Bytes>) -> Result<()> {
        let queue = self.queue(destination);
        for message in messages {
            queue.push(message)?;
        }
        Ok(())
    }

    fn subscribe(
        &self,
        destination: &Destination,
        config: ListenerConfig,
        handler: BatchHandler,
    ) -> Result<Subscription> {
        if config.batch_size == 0 || config.concurrency == 0 {
            return Err(Error::invalid_argument(
                "listener batch size and concurrency must be greater than 0",
            ));
        }

        let queue = self.queue(destination);
        let token = CancellationToken::new();
        let listeners = (0..config.concurrency)
            .map(|listener_id| {
                tokio::spawn(listener_loop(
                    listener_id,
                    Arc::clone(&queue),
                    config,
                    Arc::clone(&handler),
                    token.clone(),
                ))
            })
            .collect();

        tracing::debug!(
            %destination,
            concurrency = config.concurrency,
            batch_size = config.batch_size,
            "Subscribed batch listener"
        );
        Ok(Subscription::new(token, listeners))
    }
}

async fn listener_loop(
    listener_id: usize,
    queue: Arc<Queue>,
    config: ListenerConfig,
    handler: BatchHandler,
    token: CancellationToken,
) {
    tracing::trace!("Listener {listener_id} started");

    while let Some(batch) = queue.next_batch(&config, &token).await {
        tracing::trace!("Listener {listener_id} delivering {} messages", batch.len());
        handler(batch).await;
    }

    tracing::trace!("Listener {listener_id} stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;
    use futures::FutureExt;
    use tokio::sync::mpsc::unbounded_channel;

    fn destination() -> Destination {
        Destination::new("test.exchange", "test.key")
    }

    fn collecting_handler() -> (BatchHandler, mpsc::UnboundedReceiver<Vec<Bytes>>) {
        let (tx, rx) = unbounded_channel();
        let handler: BatchHandler = Arc::new(move |batch: Vec<Bytes>| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(batch);
            }
            .boxed()
        });
        (handler, rx)
    }

    #[tokio::test]
    async fn groups_are_bounded_by_batch_size() {
        let channel = InMemoryChannel::new();
        for i in 0..25_u8 {
            channel
                .send(&destination(), Bytes::from(vec![i]))
                .await
                .unwrap();
        }

        let (handler, mut rx) = collecting_handler();
        let config = ListenerConfig {
            batch_size: 10,
            receive_timeout: Duration::from_millis(50),
            concurrency: 1,
        };
        let subscription = channel.subscribe(&destination(), config, handler).unwrap();

        let sizes = [
            rx.recv().await.unwrap().len(),
            rx.recv().await.unwrap().len(),
            rx.recv().await.unwrap().len(),
        ];
        assert_eq!(sizes, [10, 10, 5]);
        assert_eq!(channel.depth(&destination()), 0);
        subscription.close().await;
    }

    #[tokio::test]
    async fn partial_group_is_delivered_after_timeout() {
        let channel = Arc::new(InMemoryChannel::new());
        let (handler, mut rx) = collecting_handler();
        let config = ListenerConfig {
            batch_size: 100,
            receive_timeout: Duration::from_millis(20),
            concurrency: 2,
        };
        let subscription = channel.subscribe(&destination(), config, handler).unwrap();

        channel
            .send_batch(&destination(), vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")])
            .await
            .unwrap();

        let batch = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(batch.len(), 2);
        subscription.close().await;
    }

    #[tokio::test]
    async fn zero_concurrency_is_rejected() {
        let channel = InMemoryChannel::new();
        let (handler, _rx) = collecting_handler();
        let config = ListenerConfig {
            batch_size: 10,
            receive_timeout: Duration::from_millis(10),
            concurrency: 0,
        };
        assert!(channel.subscribe(&destination(), config, handler).is_err());
    }
}
