//! redes-writer - drains a queue of write operations into Elasticsearch bulk requests

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use redes_core::Config;

mod admin;
mod commands;
mod logging;

use commands::{BackendKind, cmd_config_init, cmd_config_show, cmd_push, cmd_run, cmd_stats};
use logging::{init_cli_logging, init_service_logging};

#[derive(Parser)]
#[command(name = "redes-writer", version)]
#[command(about = "Drain a redis queue of write operations into Elasticsearch bulk requests")]
#[command(after_help = "\
QUICK START:
  redes-writer config init -o redes-writer.toml   # Write a config template
  redes-writer run -c redes-writer.toml           # Start draining the queue
  redes-writer push -c redes-writer.toml < ops    # Enqueue one operation per line
  redes-writer stats -c redes-writer.toml         # Queue name and backlog

Every config value can be overridden with REDES_WRITER_<SECTION>_<FIELD>.")]
struct Cli {
  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Drain the queue into Elasticsearch and serve GET /stats
  Run {
    /// Config file (defaults plus environment when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Queue backend
    #[arg(long, value_enum, default_value_t = BackendKind::Redis)]
    backend: BackendKind,
  },
  /// Push raw items read from stdin, one per line
  Push {
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Reject the whole input if any line is not a valid operation
    #[arg(long)]
    check: bool,
  },
  /// Print queue name and item count as JSON
  Stats {
    #[arg(short, long)]
    config: Option<PathBuf>,
  },
  /// Configuration helpers
  Config {
    #[command(subcommand)]
    command: ConfigCommand,
  },
}

#[derive(Subcommand)]
enum ConfigCommand {
  /// Print a config template, or write it with --output
  Init {
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Overwrite an existing file
    #[arg(long)]
    force: bool,
  },
  /// Print the effective configuration
  Show {
    #[arg(short, long)]
    config: Option<PathBuf>,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();

  match cli.command {
    Commands::Run { config, backend } => {
      let config = Config::load_or_default(config.as_deref())?;
      let _guard = init_service_logging(&config.log);
      cmd_run(config, backend).await
    }
    Commands::Push { config, check } => {
      init_cli_logging();
      cmd_push(config.as_deref(), check).await
    }
    Commands::Stats { config } => {
      init_cli_logging();
      cmd_stats(config.as_deref()).await
    }
    Commands::Config { command } => {
      init_cli_logging();
      match command {
        ConfigCommand::Init { output, force } => cmd_config_init(output.as_deref(), force),
        ConfigCommand::Show { config } => cmd_config_show(config.as_deref()),
      }
    }
  }
}
