use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub connectivity: ConnectivityConfig,
}

/// Remote API endpoint and resilience knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the platform API (e.g., "http://localhost:5000/")
  pub base_url: String,
  /// Per-attempt request timeout in seconds
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
  /// Total attempts per request, first try included
  #[serde(default = "default_max_attempts")]
  pub max_attempts: u32,
  /// Fixed delay between attempts in milliseconds
  #[serde(default = "default_retry_delay_ms")]
  pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Age in seconds beyond which a cached domain is considered stale
  #[serde(default = "default_stale_secs")]
  pub stale_secs: u64,
  /// Explicit database path (defaults to the platform data directory)
  pub db_path: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      stale_secs: default_stale_secs(),
      db_path: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectivityConfig {
  /// Grace window in milliseconds before a reconnect settles to online
  #[serde(default = "default_grace_ms")]
  pub reconnect_grace_ms: u64,
}

impl Default for ConnectivityConfig {
  fn default() -> Self {
    Self {
      reconnect_grace_ms: default_grace_ms(),
    }
  }
}

fn default_timeout_secs() -> u64 {
  30
}

fn default_max_attempts() -> u32 {
  3
}

fn default_retry_delay_ms() -> u64 {
  1000
}

fn default_stale_secs() -> u64 {
  300
}

fn default_grace_ms() -> u64 {
  1500
}

impl ApiConfig {
  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }

  pub fn retry_delay(&self) -> Duration {
    Duration::from_millis(self.retry_delay_ms)
  }
}

impl CacheConfig {
  pub fn stale_after(&self) -> chrono::Duration {
    chrono::Duration::seconds(self.stale_secs as i64)
  }
}

impl ConnectivityConfig {
  pub fn reconnect_grace(&self) -> Duration {
    Duration::from_millis(self.reconnect_grace_ms)
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./edusync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/edusync/config.yaml
  /// 4. ~/.config/edusync/config.yaml
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
        "No configuration file found. Create one at ~/.config/edusync/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("edusync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("edusync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }
}
