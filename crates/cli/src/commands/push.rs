//! Push command: stdin lines onto the queue

use std::{io::BufRead, path::Path};

use anyhow::{Context, Result};
use redes_core::{Config, Operation};
use tracing::info;

use super::{connect_redis, open_queue};

pub async fn cmd_push(config_path: Option<&Path>, check: bool) -> Result<()> {
  let config = Config::load_or_default(config_path)?;
  let items = read_items(std::io::stdin().lock(), check)?;

  let queue = open_queue(&config, connect_redis(&config).await?).await?;
  queue.write(&items).await?;

  info!(queue = queue.name(), count = items.len(), "Pushed items");
  println!("Pushed {} item(s) to {}", items.len(), queue.name());
  Ok(())
}

/// One item per non-blank line. With `check`, every line must parse as an operation.
pub(crate) fn read_items(reader: impl BufRead, check: bool) -> Result<Vec<String>> {
  let mut items = Vec::new();

  for (number, line) in reader.lines().enumerate() {
    let line = line?;
    let item = line.trim();
    if item.is_empty() {
      continue;
    }
    if check {
      Operation::parse(item).with_context(|| format!("Line {} is not a valid operation", number + 1))?;
    }
    items.push(item.to_string());
  }

  Ok(items)
}
