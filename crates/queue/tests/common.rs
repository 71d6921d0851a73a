//! Shared helpers for queue integration tests.
//!
//! Everything runs against `MemoryBackend`. `FailingBackend` wraps it to
//! inject store faults.

use std::{
  sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
  },
  time::Duration,
};

use async_trait::async_trait;
use queue::{ItemStream, MemoryBackend, Queue, QueueBackend, QueueConfig, QueueError, Subscription};
use redes_core::{Error, Operation, Writer};

pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

#[allow(dead_code)]
pub fn items(values: &[&str]) -> Vec<String> {
  values.iter().map(|v| v.to_string()).collect()
}

/// Queue over a fresh memory backend
#[allow(dead_code)]
pub async fn memory_queue(name: &str) -> (Arc<MemoryBackend>, Queue) {
  let backend = Arc::new(MemoryBackend::new());
  let queue = Queue::new(backend.clone(), name, QueueConfig::default())
    .await
    .expect("memory subscribe never fails");
  (backend, queue)
}

/// Next item, failing the test if nothing arrives in time
#[allow(dead_code)]
pub async fn next_item(stream: &mut ItemStream) -> Option<String> {
  tokio::time::timeout(RECV_TIMEOUT, stream.recv())
    .await
    .expect("timed out waiting for an item")
}

#[allow(dead_code)]
pub fn index_item(index: &str, id: &str) -> String {
  format!(
    r#"{{"type":"index","index":{{"index":"{}","id":"{}","doc":{{"id":"{}"}}}}}}"#,
    index, id, id
  )
}

// ============================================================================
// Fault injection
// ============================================================================

#[allow(dead_code)]
#[derive(Default)]
pub struct FailingBackend {
  pub inner: MemoryBackend,
  pub fail_pops: AtomicBool,
  pub hang_subscribe: AtomicBool,
}

#[allow(dead_code)]
impl FailingBackend {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn fail_pops(&self) {
    self.fail_pops.store(true, Ordering::SeqCst);
  }

  pub fn hang_subscribe(&self) {
    self.hang_subscribe.store(true, Ordering::SeqCst);
  }
}

#[async_trait]
impl QueueBackend for FailingBackend {
  fn kind(&self) -> &'static str {
    "failing"
  }

  async fn append(&self, key: &str, items: &[String], topic: &str) -> Result<(), QueueError> {
    self.inner.append(key, items, topic).await
  }

  async fn pop_front(&self, key: &str) -> Result<Option<String>, QueueError> {
    if self.fail_pops.load(Ordering::SeqCst) {
      return Err(QueueError::Backend("connection reset by peer".to_string()));
    }
    self.inner.pop_front(key).await
  }

  async fn push_front(&self, key: &str, item: String) -> Result<(), QueueError> {
    self.inner.push_front(key, item).await
  }

  async fn length(&self, key: &str) -> Result<i64, QueueError> {
    self.inner.length(key).await
  }

  async fn publish(&self, topic: &str, payload: &str) -> Result<(), QueueError> {
    self.inner.publish(topic, payload).await
  }

  async fn subscribe(&self, topic: &str) -> Result<Subscription, QueueError> {
    if self.hang_subscribe.load(Ordering::SeqCst) {
      futures::future::pending::<()>().await;
    }
    self.inner.subscribe(topic).await
  }

  async fn ping(&self) -> Result<(), QueueError> {
    Ok(())
  }
}

// ============================================================================
// Writers
// ============================================================================

/// Records accepted operations; rejects any operation whose id is in `reject`.
#[allow(dead_code)]
#[derive(Default)]
pub struct RecordingWriter {
  pub accepted: Mutex<Vec<Operation>>,
  pub reject: Vec<String>,
}

#[allow(dead_code)]
impl RecordingWriter {
  pub fn rejecting(ids: &[&str]) -> Self {
    Self {
      reject: ids.iter().map(|id| id.to_string()).collect(),
      ..Default::default()
    }
  }

  pub fn ids(&self) -> Vec<String> {
    self
      .accepted
      .lock()
      .unwrap()
      .iter()
      .filter_map(|op| op.target().id.clone())
      .collect()
  }

  pub async fn wait_for(&self, count: usize) {
    tokio::time::timeout(RECV_TIMEOUT, async {
      while self.accepted.lock().unwrap().len() < count {
        tokio::time::sleep(Duration::from_millis(5)).await;
      }
    })
    .await
    .expect("writer did not receive enough operations");
  }
}

#[async_trait]
impl Writer for RecordingWriter {
  async fn accept(&self, operation: Operation) -> redes_core::Result<()> {
    if let Some(id) = &operation.target().id
      && self.reject.contains(id)
    {
      return Err(Error::Writer(format!("rejected {}", id)));
    }
    self.accepted.lock().unwrap().push(operation);
    Ok(())
  }
}
