pub mod backend;
mod error;
pub mod listener;
pub mod queue;

pub use backend::{MemoryBackend, QueueBackend, Subscription};
#[cfg(feature = "redis")]
pub use backend::RedisBackend;
pub use error::QueueError;
pub use listener::Listener;
pub use queue::{ItemStream, Queue, QueueConfig, WAKE_PAYLOAD, topic_for};
