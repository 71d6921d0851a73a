//! Run command: queue -> listener -> bulk processor, plus the admin endpoint

use std::sync::Arc;

use anyhow::{Context, Result};
use queue::{Listener, MemoryBackend, Queue};
use redes_core::{Config, Error};
use sink::{BulkConfig, BulkProcessor, HttpTransport, RetryConfig};
use tokio::{
  io::{AsyncBufReadExt, BufReader},
  sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{connect_redis, open_queue};
use crate::admin::{self, AdminState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum BackendKind {
  /// Shared queue on the configured redis server
  Redis,
  /// Process-local queue fed from stdin, one item per line
  Memory,
}

pub async fn cmd_run(config: Config, backend_kind: BackendKind) -> Result<()> {
  let retry = RetryConfig::default().with_max_retries(config.listener.max_retries);
  let es_url = config.elasticsearch.base_url()?;
  let transport = HttpTransport::new(&es_url, retry.request_timeout)?;
  transport.ping().await.context("Elasticsearch is not reachable")?;

  let backend = match backend_kind {
    BackendKind::Redis => connect_redis(&config).await?,
    BackendKind::Memory => Arc::new(MemoryBackend::new()),
  };
  let queue = Arc::new(open_queue(&config, backend).await?);

  let processor = Arc::new(BulkProcessor::start(
    Arc::new(transport),
    BulkConfig {
      retry,
      ..BulkConfig::from(&config.listener)
    },
  ));

  let cancel = CancellationToken::new();
  let (errors_tx, mut errors_rx) = mpsc::channel::<Error>(16);
  let listener = Listener::run(&cancel, errors_tx.clone(), &queue, processor.clone())?;

  let state = AdminState {
    processor: processor.clone(),
    queue: queue.clone(),
  };
  let (_addr, admin) = admin::serve(&config.admin.url, state, cancel.clone()).await?;

  if backend_kind == BackendKind::Memory {
    tokio::spawn(feed_stdin(queue.clone(), errors_tx, cancel.clone()));
  }

  info!(
    queue = queue.name(),
    backend = queue.backend().kind(),
    elasticsearch = %es_url,
    "redes-writer running"
  );

  let failure = tokio::select! {
    _ = tokio::signal::ctrl_c() => {
      info!("Interrupted, shutting down");
      None
    }
    Some(err) = errors_rx.recv() => {
      error!(error = %err, kind = ?err.kind(), "Stopping on error");
      Some(err)
    }
  };

  cancel.cancel();
  if let Err(e) = listener.await {
    warn!(error = %e, "Listener task panicked");
  }
  queue.close().await;
  processor.close().await;
  match admin.await {
    Ok(Err(e)) => warn!(error = %e, "Admin endpoint failed"),
    Err(e) => warn!(error = %e, "Admin task panicked"),
    Ok(Ok(())) => {}
  }

  info!(stats = ?processor.stats(), "Stopped");

  match failure {
    Some(err) => Err(anyhow::Error::new(err).context("redes-writer stopped on error")),
    None => Ok(()),
  }
}

/// Push stdin lines onto a memory-backed queue until EOF or cancellation.
async fn feed_stdin(queue: Arc<Queue>, errors: mpsc::Sender<Error>, cancel: CancellationToken) {
  let mut lines = BufReader::new(tokio::io::stdin()).lines();

  loop {
    let line = tokio::select! {
      biased;

      _ = cancel.cancelled() => break,
      line = lines.next_line() => line,
    };

    let item = match line {
      Ok(Some(line)) if line.trim().is_empty() => continue,
      Ok(Some(line)) => line.trim().to_string(),
      Ok(None) => {
        debug!("stdin closed");
        break;
      }
      Err(e) => {
        let _ = errors.send(Error::Io(e)).await;
        break;
      }
    };

    if let Err(e) = queue.write(&[item]).await {
      let _ = errors.send(e.into()).await;
      break;
    }
  }
}
