//! Logging setup for the redes-writer binary

use redes_core::LogConfig;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const LOG_FILE: &str = "redes-writer.log";

/// Console logging for one-shot commands
pub fn init_cli_logging() {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy(),
    )
    .with_writer(std::io::stderr)
    .init();
}

/// Parse log level from config string
fn parse_log_level(level: &str) -> LevelFilter {
  match level.to_lowercase().as_str() {
    "off" => LevelFilter::OFF,
    "error" => LevelFilter::ERROR,
    "warn" => LevelFilter::WARN,
    "info" => LevelFilter::INFO,
    "debug" => LevelFilter::DEBUG,
    "trace" => LevelFilter::TRACE,
    _ => LevelFilter::INFO,
  }
}

/// Logging for `run`, driven by the `[log]` section.
///
/// Console with colors unless `log.directory` is set, in which case logs go to
/// a rolling file there. Keep the returned guard alive until exit.
pub fn init_service_logging(config: &LogConfig) -> Option<WorkerGuard> {
  let env_filter = EnvFilter::builder()
    .with_default_directive(parse_log_level(&config.level).into())
    .from_env_lossy();

  let Some(directory) = config.directory.as_deref() else {
    tracing_subscriber::fmt()
      .with_env_filter(env_filter)
      .with_target(true)
      .with_ansi(true)
      .init();
    return None;
  };

  if let Err(e) = std::fs::create_dir_all(directory) {
    eprintln!("Cannot create log directory {}: {}; logging to console", directory, e);
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
    return None;
  }

  let file_appender = match config.rotation.as_str() {
    "hourly" => tracing_appender::rolling::hourly(directory, LOG_FILE),
    "never" => tracing_appender::rolling::never(directory, LOG_FILE),
    _ => tracing_appender::rolling::daily(directory, LOG_FILE),
  };
  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

  tracing_subscriber::fmt()
    .with_env_filter(env_filter)
    .with_target(true)
    .with_ansi(false)
    .with_writer(file_writer)
    .init();

  Some(guard)
}
