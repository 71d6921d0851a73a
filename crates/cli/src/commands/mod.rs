//! CLI command implementations

mod config;
mod push;
mod run;
mod stats;

use std::sync::Arc;

use anyhow::{Context, Result};
use queue::{Queue, QueueBackend, QueueConfig, RedisBackend};
use redes_core::Config;

pub use config::{cmd_config_init, cmd_config_show};
pub use push::cmd_push;
pub use run::{BackendKind, cmd_run};
pub use stats::cmd_stats;

async fn connect_redis(config: &Config) -> Result<Arc<dyn QueueBackend>> {
  let url = config.redis.connection_url()?;
  let backend = RedisBackend::connect(&url)
    .await
    .context("Failed to connect to redis")?;
  Ok(Arc::new(backend))
}

async fn open_queue(config: &Config, backend: Arc<dyn QueueBackend>) -> Result<Queue> {
  Queue::new(backend, config.redis.queue_name.as_str(), QueueConfig::from(&config.redis))
    .await
    .with_context(|| format!("Failed to open queue {}", config.redis.queue_name))
}
