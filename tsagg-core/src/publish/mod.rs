//! Broker boundary: publishing finished work messages. [`Publisher`] is
//! a single `publish` call; concrete access lives in [`amqp`].

pub mod amqp;

use async_trait::async_trait;

use crate::error::Result;

pub use amqp::AmqpPublisher;

/// Publishes pre-serialized message bodies to a named queue.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publishes `body` (a JSON array, already chunked and serialized by
    /// the caller) to `queue`.
    async fn publish(&self, queue: &str, body: Vec<u8>) -> Result<()>;
}
