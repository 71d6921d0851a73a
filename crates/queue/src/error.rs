use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
  #[error("Redis: {0}")]
  Redis(String),

  #[error("Backend: {0}")]
  Backend(String),

  #[error("Subscription to {topic} not confirmed within {timeout:?}")]
  SubscribeTimeout { topic: String, timeout: Duration },

  #[error("Subscription to {0} ended")]
  SubscriptionClosed(String),

  #[error("Queue {0} already has an active listener")]
  AlreadyListening(String),
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for QueueError {
  fn from(e: redis::RedisError) -> Self {
    QueueError::Redis(e.to_string())
  }
}

impl From<QueueError> for redes_core::Error {
  fn from(e: QueueError) -> Self {
    redes_core::Error::Queue(e.to_string())
  }
}
