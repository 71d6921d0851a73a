//! Feeds queue items to a `Writer`.

use std::sync::Arc;

use redes_core::{Error, Operation, Writer};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::{
  error::QueueError,
  queue::{Queue, report},
};

pub struct Listener;

impl Listener {
  /// Start consuming `queue` in the background.
  ///
  /// Every item is parsed and handed to `writer`. Parse and writer failures
  /// go to `errors` and the loop moves on to the next item. The task ends when
  /// `cancel` fires; an in-flight `accept` is allowed to finish first.
  pub fn run(
    cancel: &CancellationToken,
    errors: mpsc::Sender<Error>,
    queue: &Queue,
    writer: Arc<dyn Writer>,
  ) -> Result<JoinHandle<()>, QueueError> {
    let mut stream = queue.listen(cancel, errors.clone())?;
    let name = queue.name().to_string();
    let cancel = cancel.clone();

    Ok(tokio::spawn(async move {
      debug!(queue = %name, "Listener started");

      while let Some(raw) = stream.recv().await {
        let operation = match Operation::parse(&raw) {
          Ok(operation) => operation,
          Err(e) => {
            report(&errors, &cancel, e).await;
            continue;
          }
        };

        trace!(queue = %name, kind = %operation.kind(), index = operation.index(), "Dispatching");
        if let Err(e) = writer.accept(operation).await {
          report(&errors, &cancel, e).await;
        }
      }

      debug!(queue = %name, "Listener stopped");
    }))
  }
}
