//! Configuration for redes-writer.
//!
//! Priority: environment (`REDES_WRITER_*`) > config file > defaults.
//! `${VAR}` and `$VAR` references inside the file are expanded before parsing.

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

/// Prefix for environment overrides, e.g. `REDES_WRITER_REDIS_URL`
pub const ENV_PREFIX: &str = "REDES_WRITER";

// ============================================================================
// Admin Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
  /// Listen address for the stats endpoint (default: 0.0.0.0:8484)
  pub url: String,
}

impl Default for AdminConfig {
  fn default() -> Self {
    Self {
      url: "0.0.0.0:8484".to_string(),
    }
  }
}

// ============================================================================
// Redis Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
  /// `redis://[:password@]host:port[/db][?ssl=true|false]`
  pub url: String,

  /// List key; the notification topic is `<queue_name>-pubsub`
  pub queue_name: String,

  /// How long queue construction waits for the subscription to be confirmed
  pub subscribe_timeout_ms: u64,
}

impl Default for RedisConfig {
  fn default() -> Self {
    Self {
      url: "redis://127.0.0.1:6379?ssl=false".to_string(),
      queue_name: "es-writer".to_string(),
      subscribe_timeout_ms: 1000,
    }
  }
}

impl RedisConfig {
  pub fn subscribe_timeout(&self) -> Duration {
    Duration::from_millis(self.subscribe_timeout_ms)
  }

  /// URL in the form the redis client understands.
  ///
  /// `ssl=true` switches the scheme to `rediss://` without certificate
  /// verification; the `ssl` parameter itself is dropped.
  pub fn connection_url(&self) -> Result<String> {
    let mut url = parse_url("redis.url", &self.url)?;

    let mut ssl = false;
    let rest: Vec<(String, String)> = url
      .query_pairs()
      .filter_map(|(key, value)| {
        if key.eq_ignore_ascii_case("ssl") {
          ssl = value.eq_ignore_ascii_case("true");
          None
        } else {
          Some((key.into_owned(), value.into_owned()))
        }
      })
      .collect();

    if rest.is_empty() {
      url.set_query(None);
    } else {
      url.query_pairs_mut().clear().extend_pairs(&rest);
    }

    if ssl {
      let scheme = url.scheme().to_string();
      url
        .set_scheme("rediss")
        .map_err(|()| Error::Config(format!("redis.url: cannot enable TLS for scheme {}", scheme)))?;
      url.set_fragment(Some("insecure"));
    }
    Ok(url.into())
  }
}

fn parse_url(key: &str, raw: &str) -> Result<Url> {
  Url::parse(raw).map_err(|e| Error::Config(format!("{}: invalid URL {:?}: {}", key, raw, e)))
}

// ============================================================================
// Elasticsearch Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElasticsearchConfig {
  /// Cluster URL; query parameters such as `?sniff=false` are ignored
  pub url: String,
}

impl Default for ElasticsearchConfig {
  fn default() -> Self {
    Self {
      url: "http://127.0.0.1:9200".to_string(),
    }
  }
}

impl ElasticsearchConfig {
  /// URL without query string, fragment or trailing slash.
  pub fn base_url(&self) -> Result<String> {
    let mut url = parse_url("elasticsearch.url", &self.url)?;
    url.set_query(None);
    url.set_fragment(None);
    Ok(url.as_str().trim_end_matches('/').to_string())
  }
}

// ============================================================================
// Listener Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
  /// Operations per bulk request (default: 500)
  pub buffer_size: usize,

  /// Flush pending operations after this long without a full batch (default: 1000)
  pub flush_interval_ms: u64,

  /// Retries for a failed bulk request (default: 3)
  pub max_retries: u32,
}

impl Default for ListenerConfig {
  fn default() -> Self {
    Self {
      buffer_size: 500,
      flush_interval_ms: 1000,
      max_retries: 3,
    }
  }
}

impl ListenerConfig {
  pub fn flush_interval(&self) -> Duration {
    Duration::from_millis(self.flush_interval_ms)
  }
}

// ============================================================================
// Log Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// "off", "error", "warn", "info", "debug", "trace" (RUST_LOG wins when set)
  pub level: String,

  /// Write logs to files in this directory instead of the console
  pub directory: Option<String>,

  /// "daily", "hourly" or "never" (only with `directory`)
  pub rotation: String,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      directory: None,
      rotation: "daily".to_string(),
    }
  }
}

// ============================================================================
// Main Configuration
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  pub admin: AdminConfig,
  pub redis: RedisConfig,
  pub elasticsearch: ElasticsearchConfig,
  pub listener: ListenerConfig,
  pub log: LogConfig,
}

impl Config {
  /// Load from a file, then apply environment overrides.
  pub fn load(path: &Path) -> Result<Self> {
    let content = std::fs::read_to_string(path)?;
    let mut config = Self::from_toml_str(&expand_env(&content, |name| std::env::var(name).ok()))?;
    config.apply_env(ENV_PREFIX)?;
    Ok(config)
  }

  /// Load from an optional file; without one, defaults plus environment.
  pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
    match path {
      Some(path) => Self::load(path),
      None => {
        let mut config = Self::default();
        config.apply_env(ENV_PREFIX)?;
        Ok(config)
      }
    }
  }

  pub fn from_toml_str(content: &str) -> Result<Self> {
    toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
  }

  /// Apply `<prefix>_<SECTION>_<FIELD>` overrides from the process environment.
  pub fn apply_env(&mut self, prefix: &str) -> Result<()> {
    self.apply_env_with(prefix, |name| std::env::var(name).ok())
  }

  /// Apply overrides using an arbitrary lookup.
  pub fn apply_env_with(&mut self, prefix: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
    let var = |name: &str| lookup(&format!("{}_{}", prefix, name));

    if let Some(v) = var("ADMIN_URL") {
      self.admin.url = v;
    }
    if let Some(v) = var("REDIS_URL") {
      self.redis.url = v;
    }
    if let Some(v) = var("REDIS_QUEUE_NAME") {
      self.redis.queue_name = v;
    }
    if let Some(v) = var("REDIS_SUBSCRIBE_TIMEOUT_MS") {
      self.redis.subscribe_timeout_ms = parse_env("REDIS_SUBSCRIBE_TIMEOUT_MS", &v)?;
    }
    if let Some(v) = var("ELASTICSEARCH_URL") {
      self.elasticsearch.url = v;
    }
    if let Some(v) = var("LISTENER_BUFFER_SIZE") {
      self.listener.buffer_size = parse_env("LISTENER_BUFFER_SIZE", &v)?;
    }
    if let Some(v) = var("LISTENER_FLUSH_INTERVAL_MS") {
      self.listener.flush_interval_ms = parse_env("LISTENER_FLUSH_INTERVAL_MS", &v)?;
    }
    if let Some(v) = var("LISTENER_MAX_RETRIES") {
      self.listener.max_retries = parse_env("LISTENER_MAX_RETRIES", &v)?;
    }
    if let Some(v) = var("LOG_LEVEL") {
      self.log.level = v;
    }
    if let Some(v) = var("LOG_DIRECTORY") {
      self.log.directory = Some(v).filter(|d| !d.is_empty());
    }
    if let Some(v) = var("LOG_ROTATION") {
      self.log.rotation = v;
    }

    Ok(())
  }

  /// Generate a default config file as a string
  pub fn generate_template() -> String {
    r#"# redes-writer configuration
# Every value can be overridden with REDES_WRITER_<SECTION>_<FIELD>,
# e.g. REDES_WRITER_REDIS_URL. ${VAR} references are expanded.

[admin]
# Listen address for GET /stats
url = "0.0.0.0:8484"

[redis]
url = "redis://127.0.0.1:6379?ssl=false"

# List key; notifications go to "<queue_name>-pubsub"
queue_name = "es-writer"

# Startup fails if the subscription is not confirmed in time
subscribe_timeout_ms = 1000

[elasticsearch]
url = "http://127.0.0.1:9200"

[listener]
# Operations per bulk request
buffer_size = 500

# Flush a partial batch after this many milliseconds
flush_interval_ms = 1000

# Retries for a failed bulk request
max_retries = 3

[log]
# off, error, warn, info, debug, trace (RUST_LOG takes precedence)
level = "info"

# Log to rolling files in this directory instead of the console
# directory = "/var/log/redes-writer"

# daily, hourly or never
rotation = "daily"
"#
    .to_string()
  }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
  T::Err: std::fmt::Display,
{
  value
    .trim()
    .parse()
    .map_err(|e| Error::Config(format!("{}_{}={:?}: {}", ENV_PREFIX, name, value, e)))
}

/// Expand `${VAR}` and `$VAR` references. Unknown variables expand to "".
pub fn expand_env(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
  let mut out = String::with_capacity(input.len());
  let mut chars = input.char_indices().peekable();

  while let Some((_, c)) = chars.next() {
    if c != '$' {
      out.push(c);
      continue;
    }

    match chars.peek() {
      Some(&(_, '{')) => {
        chars.next();
        let mut name = String::new();
        let mut closed = false;
        for (_, c) in chars.by_ref() {
          if c == '}' {
            closed = true;
            break;
          }
          name.push(c);
        }
        if closed {
          out.push_str(&lookup(&name).unwrap_or_default());
        } else {
          out.push_str("${");
          out.push_str(&name);
        }
      }
      Some(&(_, next)) if next == '_' || next.is_ascii_alphabetic() => {
        let mut name = String::new();
        while let Some(&(_, c)) = chars.peek() {
          if c == '_' || c.is_ascii_alphanumeric() {
            name.push(c);
            chars.next();
          } else {
            break;
          }
        }
        out.push_str(&lookup(&name).unwrap_or_default());
      }
      _ => out.push('$'),
    }
  }

  out
}
