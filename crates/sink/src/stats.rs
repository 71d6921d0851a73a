use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::transport::BulkResponse;

/// Running counters for a `BulkProcessor`.
#[derive(Debug, Default)]
pub struct BulkStats {
  flushed: AtomicU64,
  committed: AtomicU64,
  indexed: AtomicU64,
  created: AtomicU64,
  updated: AtomicU64,
  deleted: AtomicU64,
  succeeded: AtomicU64,
  failed: AtomicU64,
  pending: AtomicU64,
}

/// Point-in-time copy of `BulkStats`, as served on `/stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
  /// Bulk requests attempted
  pub flushed: u64,
  /// Bulk requests the cluster answered
  pub committed: u64,
  pub indexed: u64,
  pub created: u64,
  pub updated: u64,
  pub deleted: u64,
  /// Operations the cluster applied
  pub succeeded: u64,
  /// Operations rejected per item, or lost to a failed request
  pub failed: u64,
  /// Accepted operations not yet flushed
  pub pending: u64,
}

impl BulkStats {
  pub fn snapshot(&self) -> StatsSnapshot {
    StatsSnapshot {
      flushed: self.flushed.load(Ordering::Relaxed),
      committed: self.committed.load(Ordering::Relaxed),
      indexed: self.indexed.load(Ordering::Relaxed),
      created: self.created.load(Ordering::Relaxed),
      updated: self.updated.load(Ordering::Relaxed),
      deleted: self.deleted.load(Ordering::Relaxed),
      succeeded: self.succeeded.load(Ordering::Relaxed),
      failed: self.failed.load(Ordering::Relaxed),
      pending: self.pending.load(Ordering::Relaxed),
    }
  }

  pub(crate) fn record_accepted(&self) {
    self.pending.fetch_add(1, Ordering::Relaxed);
  }

  pub(crate) fn record_flush(&self, operations: usize) {
    self.flushed.fetch_add(1, Ordering::Relaxed);
    let _ = self
      .pending
      .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |p| {
        Some(p.saturating_sub(operations as u64))
      });
  }

  pub(crate) fn record_response(&self, response: &BulkResponse) {
    self.committed.fetch_add(1, Ordering::Relaxed);

    for item in &response.items {
      for (action, result) in item {
        let counter = match action.as_str() {
          "index" => &self.indexed,
          "create" => &self.created,
          "update" => &self.updated,
          "delete" => &self.deleted,
          _ => continue,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        if result.succeeded() {
          self.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
          self.failed.fetch_add(1, Ordering::Relaxed);
        }
      }
    }
  }

  pub(crate) fn record_failed_request(&self, operations: usize) {
    self.failed.fetch_add(operations as u64, Ordering::Relaxed);
  }
}
