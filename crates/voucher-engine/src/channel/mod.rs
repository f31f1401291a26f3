//! The message channel the pipeline publishes to and consumes from.
//!
//! A [`Channel`] is an at-least-once transport addressed by
//! [`Destination`]s. It accepts single messages and wire-level batches, and
//! delivers queued messages to subscribers in groups bounded by a
//! [`ListenerConfig`]. Subscriptions are explicit calls returning a
//! [`Subscription`] handle.
//!
//! ## Submodules
//!
//! - [`memory`] - An in-process broker implementing the contract.
//! - [`batching`] - The publish-side accumulation layer that groups outgoing
//!   messages by count, bytes and age.

pub mod batching;
pub mod memory;

use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use core::{fmt, time::Duration};
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use batching::{BatchingStrategy, BatchingTemplate};
pub use memory::InMemoryChannel;

/// Addressing pair identifying where a message is delivered.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Destination {
    pub exchange: String,
    pub routing_key: String,
}

impl Destination {
    pub fn new(exchange: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.exchange, self.routing_key)
    }
}

/// How a subscriber wants queued messages grouped.
#[derive(Clone, Copy, Debug)]
pub struct ListenerConfig {
    /// Maximum messages per delivered group.
    pub batch_size: usize,
    /// How long to keep filling a group after its first message arrived.
    pub receive_timeout: Duration,
    /// Number of competing listener tasks.
    pub concurrency: usize,
}

/// Callback invoked with every group of messages delivered to a subscriber.
pub type BatchHandler = Arc<dyn Fn(Vec<Bytes>) -> BoxFuture<'static, ()> + Send + Sync>;

#[async_trait]
pub trait Channel: Send + Sync {
    /// Delivers one message. Success means the channel holds the message.
    async fn send(&self, destination: &Destination, message: Bytes) -> Result<()>;

    /// Delivers a group of messages as one wire-level batch.
    async fn send_batch(&self, destination: &Destination, messages: Vec<Bytes>) -> Result<()> {
        for message in messages {
            self.send(destination, message).await?;
        }
        Ok(())
    }

    /// Binds `handler` to the queue behind `destination`.
    ///
    /// Must be called from within a Tokio runtime; listener tasks are spawned
    /// immediately.
    fn subscribe(
        &self,
        destination: &Destination,
        config: ListenerConfig,
        handler: BatchHandler,
    ) -> Result<Subscription>;
}

/// Handle to the listener tasks of one subscription.
///
/// Dropping the handle stops the listeners after their current delivery.
pub struct Subscription {
    token: CancellationToken,
    listeners: Vec<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(token: CancellationToken, listeners: Vec<JoinHandle<()>>) -> Self {
        Self { token, listeners }
    }

    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Stops the listeners and waits for in-progress deliveries to finish.
    pub async fn close(mut self) {
        self.token.cancel();
        for listener in self.listeners.drain(..) {
            if let Err(e) = listener.await {
                tracing::warn!("Listener task ended abnormally: {e}");
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
