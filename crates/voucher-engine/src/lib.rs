#![doc = include_str!("../README.md")]

pub mod channel;
pub mod codec;
mod config;
mod consumer;
mod coordinator;
mod engine;
mod error;
mod generator;
mod lifecycle;
pub mod metrics;
mod model;
mod partition;
mod persister;
pub mod pool;
mod publisher;
mod stats;
pub mod store;

pub use crate::config::*;
pub use crate::consumer::*;
pub use crate::coordinator::*;
pub use crate::engine::*;
pub use crate::error::*;
pub use crate::generator::*;
pub use crate::lifecycle::{Lifecycle, Phase};
pub use crate::model::*;
pub use crate::partition::*;
pub use crate::persister::*;
pub use crate::publisher::*;
pub use crate::stats::*;
