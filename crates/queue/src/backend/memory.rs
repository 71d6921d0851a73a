//! Process-local backend. Lists live in a `DashMap`, topics are broadcast channels.

use std::collections::VecDeque;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::trace;

use super::{QueueBackend, Subscription};
use crate::{error::QueueError, queue::WAKE_PAYLOAD};

const TOPIC_CAPACITY: usize = 64;

#[derive(Debug, Default)]
pub struct MemoryBackend {
  lists: DashMap<String, VecDeque<String>>,
  topics: DashMap<String, broadcast::Sender<String>>,
}

impl MemoryBackend {
  pub fn new() -> Self {
    Self::default()
  }

  /// Drop a topic, ending every subscription to it.
  pub fn close_topic(&self, topic: &str) {
    self.topics.remove(topic);
  }

  fn sender(&self, topic: &str) -> broadcast::Sender<String> {
    self
      .topics
      .entry(topic.to_string())
      .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
      .clone()
  }

  fn notify(&self, topic: &str, payload: &str) {
    // No subscribers is not an error
    let _ = self.sender(topic).send(payload.to_string());
  }
}

#[async_trait]
impl QueueBackend for MemoryBackend {
  fn kind(&self) -> &'static str {
    "memory"
  }

  async fn append(&self, key: &str, items: &[String], topic: &str) -> Result<(), QueueError> {
    {
      let mut list = self.lists.entry(key.to_string()).or_default();
      list.extend(items.iter().cloned());
    }
    self.notify(topic, WAKE_PAYLOAD);
    Ok(())
  }

  async fn pop_front(&self, key: &str) -> Result<Option<String>, QueueError> {
    Ok(self.lists.get_mut(key).and_then(|mut list| list.pop_front()))
  }

  async fn push_front(&self, key: &str, item: String) -> Result<(), QueueError> {
    self.lists.entry(key.to_string()).or_default().push_front(item);
    Ok(())
  }

  async fn length(&self, key: &str) -> Result<i64, QueueError> {
    Ok(self.lists.get(key).map_or(0, |list| list.len() as i64))
  }

  async fn publish(&self, topic: &str, payload: &str) -> Result<(), QueueError> {
    self.notify(topic, payload);
    Ok(())
  }

  async fn subscribe(&self, topic: &str) -> Result<Subscription, QueueError> {
    let rx = self.sender(topic).subscribe();

    let stream = futures::stream::unfold(rx, |mut rx| async move {
      match rx.recv().await {
        Ok(payload) => Some((Ok(payload), rx)),
        // Dropped notifications still mean "something changed"
        Err(RecvError::Lagged(skipped)) => {
          trace!(skipped, "Subscriber lagged");
          Some((Ok(WAKE_PAYLOAD.to_string()), rx))
        }
        Err(RecvError::Closed) => None,
      }
    });

    Ok(stream.boxed())
  }

  async fn ping(&self) -> Result<(), QueueError> {
    Ok(())
  }
}
