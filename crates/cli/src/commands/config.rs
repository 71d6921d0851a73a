//! Config commands

use std::path::Path;

use anyhow::{Context, Result, bail};
use redes_core::Config;
use tracing::info;

/// Print the config template, or write it to `output`.
pub fn cmd_config_init(output: Option<&Path>, force: bool) -> Result<()> {
  let template = Config::generate_template();

  let Some(path) = output else {
    print!("{}", template);
    return Ok(());
  };

  if path.exists() && !force {
    bail!("Config file already exists: {} (use --force to overwrite)", path.display());
  }
  if let Some(parent) = path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)?;
  }
  std::fs::write(path, template).with_context(|| format!("Failed to write {}", path.display()))?;

  info!(path = %path.display(), "Config written");
  println!("Created config at {}", path.display());
  Ok(())
}

/// Print the effective configuration after file and environment overrides.
pub fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
  let config = Config::load_or_default(config_path)?;
  print!("{}", toml::to_string_pretty(&config)?);
  Ok(())
}
