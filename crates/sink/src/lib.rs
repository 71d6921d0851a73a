mod bulk;
mod error;
pub mod retry;
mod stats;
pub mod transport;

pub use bulk::{BulkConfig, BulkProcessor};
pub use error::SinkError;
pub use retry::RetryConfig;
pub use stats::{BulkStats, StatsSnapshot};
pub use transport::{BulkItemError, BulkItemResult, BulkResponse, BulkTransport, HttpTransport};
