//! Bulk processor - accumulates rendered operations and flushes them to `_bulk`.
//!
//! A batch is sent when `bulk_actions` operations are pending, when the oldest
//! pending operation is `flush_interval` old, on `flush()`, and on `close()`.

use std::{
  sync::{Arc, Mutex, PoisonError},
  time::{Duration, Instant},
};

use async_trait::async_trait;
use redes_core::{BulkLines, ListenerConfig, Operation, Writer};
use tokio::{
  sync::{mpsc, oneshot},
  task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::{
  error::SinkError,
  retry::{RetryConfig, send_with_retry},
  stats::{BulkStats, StatsSnapshot},
  transport::{BulkResponse, BulkTransport},
};

#[derive(Debug, Clone)]
pub struct BulkConfig {
  /// Operations per bulk request
  pub bulk_actions: usize,
  /// Maximum age of a pending operation before a partial batch is sent
  pub flush_interval: Duration,
  /// Operations buffered between `accept` and the flush worker
  pub channel_capacity: usize,
  pub retry: RetryConfig,
}

impl Default for BulkConfig {
  fn default() -> Self {
    Self {
      bulk_actions: 500,
      flush_interval: Duration::from_secs(1),
      channel_capacity: 1000,
      retry: RetryConfig::default(),
    }
  }
}

impl From<&ListenerConfig> for BulkConfig {
  fn from(config: &ListenerConfig) -> Self {
    let bulk_actions = config.buffer_size.max(1);
    Self {
      bulk_actions,
      flush_interval: config.flush_interval(),
      channel_capacity: bulk_actions * 2,
      retry: RetryConfig::default().with_max_retries(config.max_retries),
    }
  }
}

enum Command {
  Add(BulkLines),
  Flush(oneshot::Sender<()>),
}

pub struct BulkProcessor {
  tx: mpsc::Sender<Command>,
  stats: Arc<BulkStats>,
  cancel: CancellationToken,
  worker: Mutex<Option<JoinHandle<()>>>,
}

impl BulkProcessor {
  /// Spawn the flush worker.
  pub fn start(transport: Arc<dyn BulkTransport>, config: BulkConfig) -> Self {
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let stats = Arc::new(BulkStats::default());
    let cancel = CancellationToken::new();

    let worker = tokio::spawn(flush_worker(rx, transport, config, stats.clone(), cancel.clone()));

    Self {
      tx,
      stats,
      cancel,
      worker: Mutex::new(Some(worker)),
    }
  }

  pub fn stats(&self) -> StatsSnapshot {
    self.stats.snapshot()
  }

  /// Send everything pending now and wait for the request to finish.
  pub async fn flush(&self) -> Result<(), SinkError> {
    let (done_tx, done_rx) = oneshot::channel();
    self.tx.send(Command::Flush(done_tx)).await.map_err(|_| SinkError::Closed)?;
    done_rx.await.map_err(|_| SinkError::Closed)
  }

  /// Flush whatever is pending and stop the worker. Later `accept` calls fail.
  pub async fn close(&self) {
    self.cancel.cancel();
    let worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take();
    if let Some(worker) = worker
      && let Err(e) = worker.await
    {
      warn!(error = %e, "Bulk flush worker panicked");
    }
  }
}

#[async_trait]
impl Writer for BulkProcessor {
  async fn accept(&self, operation: Operation) -> redes_core::Result<()> {
    let lines = operation.to_bulk_lines()?;
    // Count only once a slot is held, and before the worker can flush it
    let permit = self.tx.reserve().await.map_err(|_| SinkError::Closed)?;
    self.stats.record_accepted();
    permit.send(Command::Add(lines));
    Ok(())
  }
}

impl Drop for BulkProcessor {
  fn drop(&mut self) {
    self.cancel.cancel();
  }
}

// ============================================================================
// Flush worker
// ============================================================================

struct BulkAccumulator {
  body: String,
  operations: usize,
  oldest: Option<Instant>,
}

impl BulkAccumulator {
  fn new() -> Self {
    Self {
      body: String::new(),
      operations: 0,
      oldest: None,
    }
  }

  fn add(&mut self, lines: &BulkLines) {
    lines.write_ndjson(&mut self.body);
    self.operations += 1;
    self.oldest.get_or_insert_with(Instant::now);
  }

  fn should_flush_count(&self, threshold: usize) -> bool {
    self.operations >= threshold
  }

  fn should_flush_time(&self, interval: Duration) -> bool {
    self.oldest.is_some_and(|oldest| oldest.elapsed() >= interval)
  }

  fn take(&mut self) -> (String, usize) {
    self.oldest = None;
    (std::mem::take(&mut self.body), std::mem::take(&mut self.operations))
  }

  fn is_empty(&self) -> bool {
    self.operations == 0
  }
}

async fn flush_worker(
  mut rx: mpsc::Receiver<Command>,
  transport: Arc<dyn BulkTransport>,
  config: BulkConfig,
  stats: Arc<BulkStats>,
  cancel: CancellationToken,
) {
  debug!(
    bulk_actions = config.bulk_actions,
    flush_interval_ms = config.flush_interval.as_millis(),
    "Bulk flush worker starting"
  );

  let mut accumulator = BulkAccumulator::new();
  // Tick at half the interval so a partial batch waits at most ~1.5x
  let mut interval = tokio::time::interval((config.flush_interval / 2).max(Duration::from_millis(1)));
  interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

  loop {
    tokio::select! {
      biased;

      _ = cancel.cancelled() => {
        rx.close();
        let mut waiters = Vec::new();
        while let Ok(command) = rx.try_recv() {
          match command {
            Command::Add(lines) => accumulator.add(&lines),
            Command::Flush(done) => waiters.push(done),
          }
        }
        flush(&mut accumulator, transport.as_ref(), &config.retry, &stats).await;
        for done in waiters {
          let _ = done.send(());
        }
        break;
      }

      command = rx.recv() => match command {
        Some(Command::Add(lines)) => {
          accumulator.add(&lines);
          if accumulator.should_flush_count(config.bulk_actions) {
            flush(&mut accumulator, transport.as_ref(), &config.retry, &stats).await;
          }
        }
        Some(Command::Flush(done)) => {
          flush(&mut accumulator, transport.as_ref(), &config.retry, &stats).await;
          let _ = done.send(());
        }
        None => {
          flush(&mut accumulator, transport.as_ref(), &config.retry, &stats).await;
          break;
        }
      },

      _ = interval.tick() => {
        if accumulator.should_flush_time(config.flush_interval) {
          trace!(operations = accumulator.operations, "Interval flush");
          flush(&mut accumulator, transport.as_ref(), &config.retry, &stats).await;
        }
      }
    }
  }

  debug!("Bulk flush worker stopped");
}

async fn flush(
  accumulator: &mut BulkAccumulator,
  transport: &dyn BulkTransport,
  retry: &RetryConfig,
  stats: &BulkStats,
) {
  if accumulator.is_empty() {
    return;
  }

  let (body, operations) = accumulator.take();
  stats.record_flush(operations);

  match send_with_retry(transport, &body, retry).await {
    Ok(response) => {
      stats.record_response(&response);
      log_item_errors(&response);
      trace!(operations, took_ms = response.took, "Flushed bulk request");
    }
    Err(e) => {
      stats.record_failed_request(operations);
      error!(error = %e, operations, "Bulk request failed");
    }
  }
}

fn log_item_errors(response: &BulkResponse) {
  if !response.errors {
    return;
  }

  for item in &response.items {
    for (action, result) in item {
      if let Some(err) = &result.error {
        error!(
          action = %action,
          index = %result.index,
          id = result.id.as_deref().unwrap_or_default(),
          status = result.status,
          kind = %err.kind,
          phase = err.phase.as_deref().unwrap_or_default(),
          reason = err.reason.as_deref().unwrap_or_default(),
          "Failed to process bulk item"
        );
      }
    }
  }
}
