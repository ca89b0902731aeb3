use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Directory name used under the XDG config/data directories
const APP_DIR: &str = "pinprofit-sw";

/// Environment variable overriding the cache version label at deploy time
const VERSION_ENV: &str = "PINPROFIT_SW_VERSION";

/// Environment variable overriding the origin
const ORIGIN_ENV: &str = "PINPROFIT_SW_ORIGIN";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin the client application is served from; paths resolve against it
  pub origin: String,
  /// Label of the cache generation this build owns
  pub version: String,
  /// Used for notification defaults
  pub app_name: String,
  pub routes: RoutesConfig,
  /// Pre-cached at install, in order
  pub shell_assets: Vec<String>,
  /// Served for static misses when the network is down
  pub shell_fallback: String,
  pub sync_tag: String,
  pub notification: NotificationConfig,
  pub request_timeout_secs: Option<u64>,
  pub cache_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoutesConfig {
  /// REST namespace, served network-first
  pub api_prefix: String,
  /// Realtime/streaming namespace, served network-first
  pub realtime_prefix: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationConfig {
  pub icon: Option<String>,
  pub badge: Option<String>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:8000".to_string(),
      version: "pinprofit-v1".to_string(),
      app_name: "PinProfit".to_string(),
      routes: RoutesConfig::default(),
      shell_assets: vec![
        "/".to_string(),
        "/index.html".to_string(),
        "/manifest.json".to_string(),
      ],
      shell_fallback: "/index.html".to_string(),
      sync_tag: "sync-pins".to_string(),
      notification: NotificationConfig::default(),
      request_timeout_secs: None,
      cache_path: None,
    }
  }
}

impl Default for RoutesConfig {
  fn default() -> Self {
    Self {
      api_prefix: "/api/".to_string(),
      realtime_prefix: "/ws/".to_string(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided (must exist)
  /// 2. ./pinprofit-sw.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/pinprofit-sw/config.yaml
  ///
  /// Falls back to built-in defaults when no file is found. Environment
  /// overrides are applied last.
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

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };

    let config = config.with_env_overrides();
    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("pinprofit-sw.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join(APP_DIR).join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn from_yaml(contents: &str) -> Result<Self, serde_yaml::Error> {
    // An empty file deserializes to unit, not to a mapping
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(contents)
  }

  fn with_env_overrides(mut self) -> Self {
    if let Ok(version) = std::env::var(VERSION_ENV) {
      if !version.trim().is_empty() {
        self.version = version.trim().to_string();
      }
    }
    if let Ok(origin) = std::env::var(ORIGIN_ENV) {
      if !origin.trim().is_empty() {
        self.origin = origin.trim().to_string();
      }
    }
    self
  }

  fn validate(&self) -> Result<()> {
    self.origin_url()?;
    if self.version.trim().is_empty() {
      return Err(eyre!("Cache version label must not be empty"));
    }
    for prefix in [&self.routes.api_prefix, &self.routes.realtime_prefix] {
      if !prefix.starts_with('/') {
        return Err(eyre!("Route prefix '{}' must start with '/'", prefix));
      }
    }
    if let Some(asset) = self.shell_assets.iter().find(|a| !a.starts_with('/')) {
      return Err(eyre!("Shell asset '{}' must be an absolute path", asset));
    }
    if !self.shell_assets.contains(&self.shell_fallback) {
      return Err(eyre!(
        "Shell fallback '{}' is not in the shell asset list",
        self.shell_fallback
      ));
    }
    Ok(())
  }

  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))
  }

  /// Resolve an application path (or absolute URL) against the origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin_url()?
      .join(path)
      .map_err(|e| eyre!("Invalid request path '{}': {}", path, e))
  }

  pub fn request_timeout(&self) -> Option<Duration> {
    self.request_timeout_secs.map(Duration::from_secs)
  }

  /// Location of the cache database.
  pub fn cache_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.cache_path {
      return Ok(path.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join(APP_DIR).join("cache.db"))
  }
}
