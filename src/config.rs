use chrono::Duration;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::cache::{CacheHitPolicy, GetCacheBehaviour, DEFAULT_TTL_MILLIS};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub mapping: MappingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the REST backend, e.g. http://localhost:3000
  pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// How long a recorded query answer stays live
  #[serde(default = "default_ttl_millis")]
  pub ttl_millis: i64,
  /// What repeated list queries return; unset means "all" for unfiltered
  /// queries and "previous_query" for filtered ones
  #[serde(default)]
  pub on_cache_hit_return: Option<CacheHitPolicy>,
  #[serde(default)]
  pub on_get: GetCacheBehaviour,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      ttl_millis: DEFAULT_TTL_MILLIS,
      on_cache_hit_return: None,
      on_get: GetCacheBehaviour::default(),
    }
  }
}

impl CacheConfig {
  pub fn ttl(&self) -> Duration {
    Duration::milliseconds(self.ttl_millis)
  }
}

fn default_ttl_millis() -> i64 {
  DEFAULT_TTL_MILLIS
}

#[derive(Debug, Clone, Deserialize)]
pub struct MappingConfig {
  /// Send only fields that differ from the last synced payload
  #[serde(default = "default_true")]
  pub only_emit_changed: bool,
}

impl Default for MappingConfig {
  fn default() -> Self {
    Self {
      only_emit_changed: true,
    }
  }
}

fn default_true() -> bool {
  true
}

impl Config {
  /// Defaults for everything but the API URL.
  pub fn for_url(url: &str) -> Self {
    Self {
      api: ApiConfig {
        url: url.to_string(),
      },
      cache: CacheConfig::default(),
      mapping: MappingConfig::default(),
    }
  }

  pub fn with_url(mut self, url: &str) -> Self {
    self.api.url = url.to_string();
    self
  }

  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./entitykit.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/entitykit/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/entitykit/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("entitykit.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("entitykit").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.cache.ttl_millis < 0 {
      return Err(eyre!("cache.ttl_millis must not be negative"));
    }
    Ok(config)
  }
}
