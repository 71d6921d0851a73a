//! Delivery of rendered NDJSON bodies to the `_bulk` endpoint.

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::SinkError;

/// Sends one complete `_bulk` body. No buffering, no retry.
#[async_trait]
pub trait BulkTransport: Send + Sync {
  async fn send(&self, body: String) -> Result<BulkResponse, SinkError>;
}

// ============================================================================
// Response model
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BulkResponse {
  #[serde(default)]
  pub took: u64,
  #[serde(default)]
  pub errors: bool,
  /// One entry per operation, keyed by action ("index", "update", ...)
  #[serde(default)]
  pub items: Vec<HashMap<String, BulkItemResult>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BulkItemResult {
  #[serde(rename = "_index", default)]
  pub index: String,
  #[serde(rename = "_type", default)]
  pub doc_type: Option<String>,
  #[serde(rename = "_id", default)]
  pub id: Option<String>,
  #[serde(default)]
  pub status: u16,
  #[serde(default)]
  pub error: Option<BulkItemError>,
}

impl BulkItemResult {
  pub fn succeeded(&self) -> bool {
    self.error.is_none() && (200..300).contains(&self.status)
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BulkItemError {
  #[serde(rename = "type", default)]
  pub kind: String,
  #[serde(default)]
  pub reason: Option<String>,
  #[serde(default)]
  pub phase: Option<String>,
}

// ============================================================================
// HTTP
// ============================================================================

const NDJSON: &str = "application/x-ndjson";

#[derive(Debug, Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base_url: String,
  bulk_url: String,
}

impl HttpTransport {
  /// `base_url` is the cluster address without query string or trailing slash.
  pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, SinkError> {
    let client = reqwest::Client::builder().timeout(request_timeout).build()?;
    let base_url = base_url.trim_end_matches('/').to_string();
    let bulk_url = format!("{}/_bulk", base_url);

    debug!(url = %bulk_url, "HTTP bulk transport initialized");
    Ok(Self {
      client,
      base_url,
      bulk_url,
    })
  }

  /// Check that the cluster answers at all.
  pub async fn ping(&self) -> Result<(), SinkError> {
    let response = self.client.get(&self.base_url).send().await?;
    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(SinkError::Status {
        status: status.as_u16(),
        body,
      });
    }
    info!(url = %self.base_url, "Elasticsearch reachable");
    Ok(())
  }
}

#[async_trait]
impl BulkTransport for HttpTransport {
  async fn send(&self, body: String) -> Result<BulkResponse, SinkError> {
    let response = self
      .client
      .post(&self.bulk_url)
      .header(CONTENT_TYPE, NDJSON)
      .body(body)
      .send()
      .await?;

    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(SinkError::Status {
        status: status.as_u16(),
        body,
      });
    }

    response
      .json::<BulkResponse>()
      .await
      .map_err(|e| SinkError::Response(e.to_string()))
  }
}
