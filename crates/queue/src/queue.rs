//! Durable named queue with a drain-then-wait consumer.
//!
//! Items live in a list on the backing store. Every `write` publishes one
//! notification on `<name>-pubsub`. A listening consumer pops the list until it
//! is empty, then sleeps until a notification arrives or it is cancelled.
//!
//! The subscription is taken at construction and the drain loop starts by
//! draining, so a write can never slip between an empty pop and the wait: it
//! leaves either an item for the pop or a pending wake for the wait.

use std::{
  sync::{Arc, Mutex, PoisonError},
  time::Duration,
};

use futures::{FutureExt, StreamExt};
use redes_core::{Error, RedisConfig};
use tokio::{
  sync::{Mutex as AsyncMutex, mpsc},
  task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{
  backend::{QueueBackend, Subscription},
  error::QueueError,
};

/// Payload published on every write. Subscribers only care that a message arrived.
pub const WAKE_PAYLOAD: &str = "1";

/// Poll interval used once the notification stream is gone.
const FALLBACK_POLL: Duration = Duration::from_secs(1);

/// Notification topic for a queue name.
pub fn topic_for(name: &str) -> String {
  format!("{}-pubsub", name)
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
  /// How long `Queue::new` waits for the subscription
  pub subscribe_timeout: Duration,
  /// Items popped ahead of the consumer (default: 1)
  pub prefetch: usize,
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self {
      subscribe_timeout: Duration::from_secs(1),
      prefetch: 1,
    }
  }
}

impl From<&RedisConfig> for QueueConfig {
  fn from(config: &RedisConfig) -> Self {
    Self {
      subscribe_timeout: config.subscribe_timeout(),
      ..Default::default()
    }
  }
}

#[derive(Default)]
struct Workers {
  tokens: Vec<CancellationToken>,
  handles: Vec<JoinHandle<()>>,
}

pub struct Queue {
  name: String,
  topic: String,
  backend: Arc<dyn QueueBackend>,
  config: QueueConfig,
  /// Taken by the first `listen`
  subscription: Mutex<Option<Subscription>>,
  workers: Mutex<Workers>,
}

impl Queue {
  /// Subscribe to the queue's topic and return the handle.
  ///
  /// Fails if the store rejects the subscription or does not confirm it within
  /// `config.subscribe_timeout`.
  pub async fn new(
    backend: Arc<dyn QueueBackend>,
    name: impl Into<String>,
    config: QueueConfig,
  ) -> Result<Self, QueueError> {
    let name = name.into();
    let topic = topic_for(&name);

    let subscription = match tokio::time::timeout(config.subscribe_timeout, backend.subscribe(&topic)).await {
      Ok(subscription) => subscription?,
      Err(_) => {
        return Err(QueueError::SubscribeTimeout {
          topic,
          timeout: config.subscribe_timeout,
        });
      }
    };

    debug!(queue = %name, topic = %topic, backend = backend.kind(), "Queue subscribed");

    Ok(Self {
      name,
      topic,
      backend,
      config,
      subscription: Mutex::new(Some(subscription)),
      workers: Mutex::new(Workers::default()),
    })
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn topic(&self) -> &str {
    &self.topic
  }

  pub fn backend(&self) -> &Arc<dyn QueueBackend> {
    &self.backend
  }

  /// Append items to the tail in order and wake consumers.
  pub async fn write(&self, items: &[String]) -> Result<(), QueueError> {
    if items.is_empty() {
      return Ok(());
    }

    self.backend.append(&self.name, items, &self.topic).await?;
    trace!(queue = %self.name, count = items.len(), "Wrote items");
    Ok(())
  }

  /// Number of items currently in the list.
  pub async fn count_items(&self) -> Result<i64, QueueError> {
    self.backend.length(&self.name).await
  }

  /// Start draining into the returned stream.
  ///
  /// Pop and subscription failures are sent to `errors`. Cancelling `cancel`
  /// (or calling `close`) ends the stream; items popped but not yet received
  /// go back to the head of the list.
  pub fn listen(&self, cancel: &CancellationToken, errors: mpsc::Sender<Error>) -> Result<ItemStream, QueueError> {
    let subscription = self
      .subscription
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .take()
      .ok_or_else(|| QueueError::AlreadyListening(self.name.clone()))?;

    let token = cancel.child_token();
    let (item_tx, item_rx) = mpsc::channel(self.config.prefetch.max(1));
    let (wake_tx, wake_rx) = mpsc::channel(1);
    let item_rx = Arc::new(AsyncMutex::new(item_rx));

    let forwarder = tokio::spawn(forward_wakes(
      subscription,
      wake_tx,
      errors.clone(),
      token.clone(),
      self.topic.clone(),
    ));

    let drain = tokio::spawn(
      DrainLoop {
        backend: self.backend.clone(),
        key: self.name.clone(),
        items: item_tx,
        buffered: item_rx.clone(),
        wake: wake_rx,
        wake_open: true,
        errors,
        cancel: token.clone(),
      }
      .run(),
    );

    {
      let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
      workers.tokens.push(token.clone());
      workers.handles.extend([forwarder, drain]);
    }

    debug!(queue = %self.name, "Queue listening");
    Ok(ItemStream {
      rx: item_rx,
      cancel: token,
    })
  }

  /// Stop every background task started by `listen` and wait for them.
  pub async fn close(&self) {
    let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));

    for token in &workers.tokens {
      token.cancel();
    }
    for handle in workers.handles {
      if let Err(e) = handle.await {
        warn!(queue = %self.name, error = %e, "Queue task panicked");
      }
    }
    debug!(queue = %self.name, "Queue closed");
  }
}

impl Drop for Queue {
  fn drop(&mut self) {
    let workers = self.workers.get_mut().unwrap_or_else(PoisonError::into_inner);
    for token in &workers.tokens {
      token.cancel();
    }
  }
}

// ============================================================================
// Item stream
// ============================================================================

/// Raw items in list order. Ends on cancellation or after a fatal pop error.
pub struct ItemStream {
  rx: Arc<AsyncMutex<mpsc::Receiver<String>>>,
  cancel: CancellationToken,
}

impl ItemStream {
  /// Next item, or `None` once the stream has ended.
  pub async fn recv(&mut self) -> Option<String> {
    if self.cancel.is_cancelled() {
      return None;
    }

    let mut rx = self.rx.lock().await;
    tokio::select! {
      biased;

      _ = self.cancel.cancelled() => None,
      item = rx.recv() => item,
    }
  }
}

// ============================================================================
// Background tasks
// ============================================================================

/// Send an error to the owner. A closed channel means nobody is left to tell.
///
/// Gives up once `cancel` fires so a full channel cannot stall shutdown.
pub(crate) async fn report(errors: &mpsc::Sender<Error>, cancel: &CancellationToken, err: impl Into<Error>) {
  let err = err.into();
  tokio::select! {
    biased;

    sent = errors.send(err) => {
      if sent.is_err() {
        debug!("Error channel closed");
      }
    }
    _ = cancel.cancelled() => debug!("Dropped error report after cancellation"),
  }
}

/// Turn notifications into wake signals, at most one pending at a time.
async fn forward_wakes(
  mut subscription: Subscription,
  wake: mpsc::Sender<()>,
  errors: mpsc::Sender<Error>,
  cancel: CancellationToken,
  topic: String,
) {
  loop {
    let message = tokio::select! {
      biased;

      _ = cancel.cancelled() => break,
      message = subscription.next() => message,
    };

    match message {
      Some(Ok(_)) => {}
      Some(Err(e)) => {
        report(&errors, &cancel, e).await;
        continue;
      }
      None => {
        report(&errors, &cancel, QueueError::SubscriptionClosed(topic.clone())).await;
        break;
      }
    }

    // Swallow whatever else is already buffered
    let mut ended = false;
    let mut coalesced = 0usize;
    loop {
      match subscription.next().now_or_never() {
        Some(Some(Ok(_))) => coalesced += 1,
        Some(Some(Err(e))) => report(&errors, &cancel, e).await,
        Some(None) => {
          ended = true;
          break;
        }
        None => break,
      }
    }

    // Full means a wake is already pending
    let _ = wake.try_send(());
    trace!(topic = %topic, coalesced, "Wake");

    if ended {
      report(&errors, &cancel, QueueError::SubscriptionClosed(topic.clone())).await;
      break;
    }
  }

  debug!(topic = %topic, "Wake forwarder stopped");
}

struct DrainLoop {
  backend: Arc<dyn QueueBackend>,
  key: String,
  items: mpsc::Sender<String>,
  /// Receiving side of `items`, shared with the `ItemStream`
  buffered: Arc<AsyncMutex<mpsc::Receiver<String>>>,
  wake: mpsc::Receiver<()>,
  wake_open: bool,
  errors: mpsc::Sender<Error>,
  cancel: CancellationToken,
}

impl DrainLoop {
  async fn run(mut self) {
    debug!(queue = %self.key, "Drain loop starting");
    let mut held = None;

    loop {
      let permit = tokio::select! {
        biased;

        _ = self.cancel.cancelled() => break,
        permit = self.items.reserve() => match permit {
          Ok(permit) => permit,
          Err(_) => break,
        },
      };

      match self.backend.pop_front(&self.key).await {
        Ok(Some(item)) => {
          if self.cancel.is_cancelled() {
            held = Some(item);
            break;
          }
          permit.send(item);
        }
        Ok(None) => {
          drop(permit);
          if !self.wait().await {
            break;
          }
        }
        Err(e) => {
          report(&self.errors, &self.cancel, e).await;
          debug!(queue = %self.key, "Drain loop stopped on pop failure");
          return;
        }
      }
    }

    self.requeue(held).await;
    debug!(queue = %self.key, "Drain loop stopped");
  }

  /// Block until woken. Returns false once cancelled.
  async fn wait(&mut self) -> bool {
    trace!(queue = %self.key, "Queue empty, waiting");

    if !self.wake_open {
      return tokio::select! {
        biased;

        _ = self.cancel.cancelled() => false,
        _ = tokio::time::sleep(FALLBACK_POLL) => true,
      };
    }

    tokio::select! {
      biased;

      _ = self.cancel.cancelled() => false,
      signal = self.wake.recv() => {
        if signal.is_none() {
          self.wake_open = false;
        }
        true
      }
    }
  }

  /// Return undelivered items to the head of the list, preserving order.
  async fn requeue(&self, held: Option<String>) {
    let pending = {
      let mut buffered = self.buffered.lock().await;
      buffered.close();
      let mut pending = Vec::new();
      while let Ok(item) = buffered.try_recv() {
        pending.push(item);
      }
      pending
    };

    // Newest first, so the oldest ends up at the head
    let items: Vec<String> = held.into_iter().chain(pending.into_iter().rev()).collect();
    if items.is_empty() {
      return;
    }

    debug!(queue = %self.key, count = items.len(), "Requeueing undelivered items");
    for item in items {
      if let Err(e) = self.backend.push_front(&self.key, item).await
        && self.errors.try_send(e.into()).is_err()
      {
        warn!(queue = %self.key, "Failed to requeue item and error channel is unavailable");
      }
    }
  }
}
