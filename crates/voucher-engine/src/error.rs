//! Error types for the voucher pipeline.
//!
//! This module defines the central [`Error`] enum shared by every stage of the
//! pipeline, and [`StoreError`], the narrower error surfaced by persistence
//! backends.
//!
//! ## Propagation
//!
//! Only [`Error::InvalidArgument`] and [`Error::Configuration`] are expected to
//! reach the caller of a generation or consumption request. Failures local to
//! one record or one batch are absorbed by their enclosing task and show up in
//! the statistics instead.
//!
//! ## Error Cases
//! - `InvalidArgument`: A call argument is out of range (e.g. a zero batch
//!   size).
//! - `Configuration`: The pipeline configuration failed validation.
//! - `ChannelError`: An internal communication failure between tasks, workers
//!   or the message channel.
//! - `Publish`: A single record could not be handed to the channel.
//! - `Codec`: A message could not be encoded to or decoded from the wire
//!   format.
//! - `ServiceShutdown`: Work arrived while a pool was shutting down.
//! - `ConsumerDraining`: A batch arrived while the consumer was draining.

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the voucher pipeline.
#[derive(Clone, thiserror::Error, Debug)]
pub enum Error {
    /// A call argument was outside its accepted range.
    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// The pipeline configuration is unusable.
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    /// Internal channel send/receive failure (e.g., closed or full channel).
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// One record failed to reach the message channel.
    #[error("Failed to publish voucher {voucher_number}: {reason}")]
    Publish {
        voucher_number: String,
        reason: String,
    },

    /// Wire encoding or decoding failed.
    #[error("Codec error: {reason}")]
    Codec { reason: String },

    /// The worker pool is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,

    /// The consumer is draining and refuses new batches.
    #[error("Consumer is draining")]
    ConsumerDraining,
}

impl Error {
    pub(crate) fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    pub(crate) fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Returns `true` for errors that must fail a request before any work
    /// starts.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument { .. } | Self::Configuration { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec {
            reason: err.to_string(),
        }
    }
}

/// Errors reported by a [`VoucherStore`](crate::store::VoucherStore).
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum StoreError {
    /// The voucher number is already taken.
    #[error("duplicate voucher number {voucher_number}")]
    Duplicate { voucher_number: String },

    /// The backend refused the record for a record-specific reason.
    #[error("voucher {voucher_number} rejected: {reason}")]
    Rejected {
        voucher_number: String,
        reason: String,
    },

    /// The backend could not be reached or failed as a whole.
    #[error("store unavailable: {reason}")]
    Unavailable { reason: String },
}

impl StoreError {
    /// The voucher number this error is attributed to, if any.
    pub fn voucher_number(&self) -> Option<&str> {
        match self {
            Self::Duplicate { voucher_number } | Self::Rejected { voucher_number, .. } => {
                Some(voucher_number)
            }
            Self::Unavailable { .. } => None,
        }
    }
}
