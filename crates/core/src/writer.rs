//! The sink capability the listener hands parsed operations to.

use async_trait::async_trait;

use crate::{error::Result, request::Operation};

/// Accepts one operation at a time.
///
/// Implementations are expected to do their own batching, flushing and retry
/// against the backing store. A returned error is reported on the listener's
/// error channel; the operation is not retried or re-enqueued.
#[async_trait]
pub trait Writer: Send + Sync {
  async fn accept(&self, operation: Operation) -> Result<()>;
}

#[async_trait]
impl<F> Writer for F
where
  F: Fn(Operation) -> Result<()> + Send + Sync,
{
  async fn accept(&self, operation: Operation) -> Result<()> {
    self(operation)
  }
}
