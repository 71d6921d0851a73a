//! Admin HTTP endpoint: `GET /stats`.

use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum::{
  Json, Router,
  extract::State,
  http::StatusCode,
  response::{IntoResponse, Response},
  routing::get,
};
use queue::Queue;
use serde::Serialize;
use sink::{BulkProcessor, StatsSnapshot};
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Clone)]
pub struct AdminState {
  pub processor: Arc<BulkProcessor>,
  pub queue: Arc<Queue>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsResponse {
  processor: StatsSnapshot,
  queue_name: String,
  queue_total_item: i64,
}

pub fn router(state: AdminState) -> Router {
  Router::new().route("/stats", get(stats_handler)).with_state(state)
}

async fn stats_handler(State(state): State<AdminState>) -> Response {
  match state.queue.count_items().await {
    Ok(queue_total_item) => Json(StatsResponse {
      processor: state.processor.stats(),
      queue_name: state.queue.name().to_string(),
      queue_total_item,
    })
    .into_response(),
    Err(e) => {
      error!(queue = state.queue.name(), error = %e, "Failed to count queue items");
      (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({"error": "failed to read statistics."})),
      )
        .into_response()
    }
  }
}

/// Bind `addr` and serve until `cancel` fires.
pub async fn serve(
  addr: &str,
  state: AdminState,
  cancel: CancellationToken,
) -> Result<(SocketAddr, JoinHandle<std::io::Result<()>>)> {
  let listener = TcpListener::bind(addr)
    .await
    .with_context(|| format!("Failed to bind admin endpoint on {}", addr))?;
  let local = listener.local_addr()?;
  info!(addr = %local, "Admin endpoint ready");

  let handle = tokio::spawn(async move {
    axum::serve(listener, router(state))
      .with_graceful_shutdown(async move { cancel.cancelled().await })
      .await
  });

  Ok((local, handle))
}
