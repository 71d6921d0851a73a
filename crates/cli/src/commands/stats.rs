//! Stats command

use std::path::Path;

use anyhow::Result;
use redes_core::Config;
use serde_json::json;

use super::{connect_redis, open_queue};

/// Print the queue name and how many items are waiting.
pub async fn cmd_stats(config_path: Option<&Path>) -> Result<()> {
  let config = Config::load_or_default(config_path)?;
  let queue = open_queue(&config, connect_redis(&config).await?).await?;

  let stats = json!({
    "queueName": queue.name(),
    "queueTotalItem": queue.count_items().await?,
  });
  println!("{}", serde_json::to_string_pretty(&stats)?);
  Ok(())
}
