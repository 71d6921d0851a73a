pub mod config;
pub mod error;
pub mod request;
pub mod writer;

pub use config::{AdminConfig, Config, ENV_PREFIX, ElasticsearchConfig, ListenerConfig, LogConfig, RedisConfig};
pub use error::{Error, ErrorKind, Result};
pub use request::{BulkLines, DeleteOp, IndexOp, Operation, OperationKind, Script, Target, UpdateOp};
pub use writer::Writer;
