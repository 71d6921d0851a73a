use thiserror::Error;

/// Broad classification of a failure, used by the owning process to decide
/// whether a value on the error channel ends the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  /// Backing store unreachable, subscription lost or never confirmed
  Transport,
  /// Malformed queue item or unknown operation type
  Protocol,
  /// The writer rejected an operation
  Sink,
  /// Configuration or local IO problem
  Setup,
}

#[derive(Error, Debug)]
pub enum Error {
  #[error("Decode: {0}")]
  Decode(#[from] serde_json::Error),

  #[error("Invalid operation type: {0:?}")]
  InvalidOperationType(Option<String>),

  #[error("Queue: {0}")]
  Queue(String),

  #[error("Writer: {0}")]
  Writer(String),

  #[error("Config: {0}")]
  Config(String),

  #[error("IO: {0}")]
  Io(#[from] std::io::Error),
}

impl Error {
  pub fn kind(&self) -> ErrorKind {
    match self {
      Error::Decode(_) | Error::InvalidOperationType(_) => ErrorKind::Protocol,
      Error::Queue(_) => ErrorKind::Transport,
      Error::Writer(_) => ErrorKind::Sink,
      Error::Config(_) | Error::Io(_) => ErrorKind::Setup,
    }
  }

  /// Per-item failures leave the consumer loop running.
  pub fn is_per_item(&self) -> bool {
    matches!(self.kind(), ErrorKind::Protocol | ErrorKind::Sink)
  }
}

pub type Result<T> = std::result::Result<T, Error>;
