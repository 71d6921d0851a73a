#[derive(Debug, thiserror::Error)]
pub enum SinkError {
  #[error("Request failed: {0}")]
  Request(#[from] reqwest::Error),

  #[error("Bulk request rejected with status {status}: {body}")]
  Status { status: u16, body: String },

  #[error("Invalid bulk response: {0}")]
  Response(String),

  #[error("Request timed out")]
  Timeout,

  #[error("Bulk processor closed")]
  Closed,
}

impl From<SinkError> for redes_core::Error {
  fn from(e: SinkError) -> Self {
    redes_core::Error::Writer(e.to_string())
  }
}
