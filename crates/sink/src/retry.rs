//! Retry policy for `_bulk` requests.
//!
//! A request is retried when the cluster is overloaded or unreachable. Delays
//! double per attempt up to `max_backoff`, with up to a quarter of extra jitter.

use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, trace, warn};

use crate::{
  error::SinkError,
  transport::{BulkResponse, BulkTransport},
};

#[derive(Debug, Clone)]
pub struct RetryConfig {
  /// Attempts after the first one; 0 sends each body once
  pub max_retries: u32,
  /// Delay before the first retry
  pub initial_backoff: Duration,
  /// Upper bound for any single delay, jitter included
  pub max_backoff: Duration,
  pub backoff_multiplier: f64,
  /// Spread concurrent writers apart
  pub add_jitter: bool,
  /// Limit for one `_bulk` round trip
  pub request_timeout: Duration,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      max_retries: 3,
      initial_backoff: Duration::from_millis(500),
      max_backoff: Duration::from_secs(30),
      backoff_multiplier: 2.0,
      add_jitter: true,
      request_timeout: Duration::from_secs(60),
    }
  }
}

impl RetryConfig {
  pub fn with_max_retries(mut self, max_retries: u32) -> Self {
    self.max_retries = max_retries;
    self
  }

  /// Delay before retry number `attempt + 1`.
  pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
    let cap = self.max_backoff.as_secs_f64();
    let mut delay = (self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32)).min(cap);
    if self.add_jitter {
      delay *= 1.0 + jitter_fraction() / 4.0;
    }
    Duration::from_secs_f64(delay.min(cap))
  }
}

/// Value in `[0, 1)` taken from the clock's sub-second nanos.
fn jitter_fraction() -> f64 {
  use std::time::{SystemTime, UNIX_EPOCH};

  let nanos = SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.subsec_nanos())
    .unwrap_or(0);
  f64::from(nanos) / 1_000_000_000.0
}

pub fn is_retryable_error(error: &SinkError) -> bool {
  match error {
    SinkError::Request(e) => e.is_connect() || e.is_timeout() || e.is_request(),
    SinkError::Status { status, .. } => matches!(status, 429 | 502 | 503 | 504),
    SinkError::Timeout => true,
    SinkError::Response(_) | SinkError::Closed => false,
  }
}

/// Send `body`, retrying transient failures according to `config`.
pub async fn send_with_retry(
  transport: &dyn BulkTransport,
  body: &str,
  config: &RetryConfig,
) -> Result<BulkResponse, SinkError> {
  let max_retries = config.max_retries;

  for attempt in 0..=max_retries {
    if attempt > 0 {
      let backoff = config.backoff_for_attempt(attempt - 1);
      debug!(
        attempt = attempt,
        max_retries = max_retries,
        backoff_ms = backoff.as_millis(),
        "Retrying bulk request after backoff"
      );
      sleep(backoff).await;
    }

    let error = match tokio::time::timeout(config.request_timeout, transport.send(body.to_string())).await {
      Ok(Ok(response)) => {
        if attempt > 0 {
          info!(attempt = attempt, "Bulk request succeeded after retry");
        }
        return Ok(response);
      }
      Ok(Err(e)) => e,
      Err(_) => {
        trace!(timeout_ms = config.request_timeout.as_millis(), "Bulk request timed out");
        SinkError::Timeout
      }
    };

    if !is_retryable_error(&error) {
      return Err(error);
    }
    if attempt == max_retries {
      warn!(max_retries = max_retries, err = %error, "All retries exhausted");
      return Err(error);
    }
    warn!(
      attempt = attempt + 1,
      max_retries = max_retries,
      err = %error,
      "Retryable error, will retry"
    );
  }

  Err(SinkError::Timeout)
}
