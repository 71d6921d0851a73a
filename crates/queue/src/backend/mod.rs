//! Storage seam for the queue: a durable FIFO list plus a notification topic.

mod memory;
#[cfg(feature = "redis")]
mod redis;

use async_trait::async_trait;
use futures::stream::BoxStream;

pub use self::memory::MemoryBackend;
#[cfg(feature = "redis")]
pub use self::redis::RedisBackend;
use crate::error::QueueError;

/// Notifications received on a subscribed topic, in arrival order.
///
/// The stream ends when the subscription is lost.
pub type Subscription = BoxStream<'static, Result<String, QueueError>>;

#[async_trait]
pub trait QueueBackend: Send + Sync {
  fn kind(&self) -> &'static str;

  /// Append `items` to the tail of `key` in order and publish one notification
  /// on `topic`, as a single atomic unit.
  async fn append(&self, key: &str, items: &[String], topic: &str) -> Result<(), QueueError>;

  /// Remove and return the head of `key`; `None` when the list is empty.
  async fn pop_front(&self, key: &str) -> Result<Option<String>, QueueError>;

  /// Put an item back at the head of `key`.
  async fn push_front(&self, key: &str, item: String) -> Result<(), QueueError>;

  async fn length(&self, key: &str) -> Result<i64, QueueError>;

  async fn publish(&self, topic: &str, payload: &str) -> Result<(), QueueError>;

  /// Returns once the subscription is active on the store.
  async fn subscribe(&self, topic: &str) -> Result<Subscription, QueueError>;

  async fn ping(&self) -> Result<(), QueueError>;
}
