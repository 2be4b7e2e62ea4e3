use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::cache::{CacheBound, CacheProfile};
use crate::coordinator::GridSettings;
use crate::osm::client::DEFAULT_ENDPOINTS;
use crate::osm::geocode::DEFAULT_ENDPOINT as DEFAULT_NOMINATIM;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub overpass: OverpassConfig,
  #[serde(default)]
  pub nominatim: NominatimConfig,
  #[serde(default)]
  pub grid: GridConfig,
  #[serde(default)]
  pub retry: RetryConfig,
  #[serde(default)]
  pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OverpassConfig {
  /// Interpreter endpoints, tried in order on transient failures
  pub endpoints: Vec<String>,
  /// HTTP request timeout
  pub timeout_secs: u64,
  /// Server-side [timeout:] setting embedded in queries
  pub query_timeout_secs: u32,
}

impl Default for OverpassConfig {
  fn default() -> Self {
    Self {
      endpoints: DEFAULT_ENDPOINTS.iter().map(|s| s.to_string()).collect(),
      timeout_secs: 30,
      query_timeout_secs: 25,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NominatimConfig {
  pub endpoint: String,
  pub timeout_secs: u64,
}

impl Default for NominatimConfig {
  fn default() -> Self {
    Self {
      endpoint: DEFAULT_NOMINATIM.to_string(),
      timeout_secs: 15,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GridConfig {
  /// Tile edge length for detail tiles, degrees
  pub detail_size_deg: f64,
  /// Tile edge length for low-zoom overview tiles, degrees
  pub overview_size_deg: f64,
  /// Zoom at and above which detail tiles are fetched
  pub detail_zoom: u8,
}

impl Default for GridConfig {
  fn default() -> Self {
    let defaults = GridSettings::default();
    Self {
      detail_size_deg: defaults.detail_size_deg,
      overview_size_deg: defaults.overview_size_deg,
      detail_zoom: defaults.detail_zoom,
    }
  }
}

impl GridConfig {
  pub fn settings(&self) -> GridSettings {
    GridSettings {
      detail_size_deg: self.detail_size_deg,
      overview_size_deg: self.overview_size_deg,
      detail_zoom: self.detail_zoom,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
  pub max_attempts: u32,
  pub retry_delay_ms: i64,
}

impl Default for RetryConfig {
  fn default() -> Self {
    let defaults = RetryPolicy::default();
    Self {
      max_attempts: defaults.max_attempts,
      retry_delay_ms: defaults.retry_delay.num_milliseconds(),
    }
  }
}

impl RetryConfig {
  pub fn policy(&self) -> RetryPolicy {
    RetryPolicy::new(self.max_attempts, self.retry_delay_ms)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Database location (default: platform data directory)
  pub db_path: Option<PathBuf>,
  pub rect_ttl_hours: i64,
  pub response_ttl_hours: i64,
  pub response_max_entries: usize,
  pub overview_ttl_days: i64,
  pub overview_max_bytes: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      db_path: None,
      rect_ttl_hours: 24,
      response_ttl_hours: 24,
      response_max_entries: 1000,
      overview_ttl_days: 7,
      overview_max_bytes: 50 * 1024 * 1024,
    }
  }
}

impl CacheConfig {
  pub fn rectangle_profile(&self) -> CacheProfile {
    CacheProfile::rectangle().with_ttl(chrono::Duration::hours(self.rect_ttl_hours))
  }

  pub fn response_profile(&self) -> CacheProfile {
    CacheProfile::osm_response()
      .with_ttl(chrono::Duration::hours(self.response_ttl_hours))
      .with_bound(CacheBound::MaxEntries(self.response_max_entries))
  }

  pub fn large_payload_profile(&self) -> CacheProfile {
    CacheProfile::large_payload()
      .with_ttl(chrono::Duration::days(self.overview_ttl_days))
      .with_bound(CacheBound::MaxBytes(self.overview_max_bytes))
  }
}

impl Config {
  /// Load configuration.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./lampgrid.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/lampgrid/config.yaml
  ///
  /// Unlike a credentialed service there is nothing mandatory here, so a
  /// missing file just means defaults.
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
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("lampgrid.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("lampgrid").join("config.yaml");
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
