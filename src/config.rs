use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::QueryKey;
use crate::cache::{CacheConfig, QueryOptions};

pub const API_URL_ENV: &str = "SHOPFLOOR_API_URL";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub freshness: FreshnessConfig,
  /// Work center shown when none is given on the command line
  #[serde(default = "default_work_center")]
  pub default_work_center: String,
}

fn default_work_center() -> String {
  "SAV100".to_string()
}

impl Default for Config {
  fn default() -> Self {
    Self {
      api: ApiConfig::default(),
      freshness: FreshnessConfig::default(),
      default_work_center: default_work_center(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ApiConfig {
  pub url: String,
  /// Bound on every read and write; expiry is a normal failure, never retried
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
  15
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      url: "http://localhost:8000/api".to_string(),
      timeout_secs: default_timeout_secs(),
    }
  }
}

impl ApiConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

/// Stale time and background refresh interval for one family of queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Freshness {
  #[serde(default)]
  pub stale_secs: u64,
  /// Omitted means no background refresh
  #[serde(default)]
  pub refetch_secs: Option<u64>,
}

impl Freshness {
  pub const fn new(stale_secs: u64, refetch_secs: Option<u64>) -> Self {
    Self {
      stale_secs,
      refetch_secs,
    }
  }

  pub fn options(&self) -> QueryOptions {
    let options = QueryOptions::new(Duration::from_secs(self.stale_secs));
    match self.refetch_secs {
      Some(secs) if secs > 0 => options.with_refetch_interval(Duration::from_secs(secs)),
      _ => options,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FreshnessConfig {
  pub work_orders: Freshness,
  pub schedules: Freshness,
  pub machines: Freshness,
  /// Single work order, single machine and machine calendar
  pub details: Freshness,
}

impl Default for FreshnessConfig {
  fn default() -> Self {
    Self {
      work_orders: Freshness::new(30, Some(60)),
      schedules: Freshness::new(30, Some(60)),
      machines: Freshness::new(60, Some(120)),
      details: Freshness::new(0, None),
    }
  }
}

impl FreshnessConfig {
  pub fn options_for(&self, key: &QueryKey) -> QueryOptions {
    match key {
      QueryKey::WorkOrders(_) => self.work_orders.options(),
      QueryKey::Schedule(_) => self.schedules.options(),
      QueryKey::Machines => self.machines.options(),
      QueryKey::WorkOrder(_) | QueryKey::Machine(_) | QueryKey::MachineCalendar(_) => {
        self.details.options()
      }
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./shopfloor.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/shopfloor/config.yaml
  ///
  /// Without any file the defaults are used. `SHOPFLOOR_API_URL` overrides
  /// the API url either way.
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

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };
    if let Some(url) = Self::api_url_from_env() {
      config.api.url = url;
    }
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("shopfloor.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("shopfloor").join("config.yaml");
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
    if config.api.timeout_secs == 0 {
      return Err(eyre!("api.timeout_secs must be at least 1"));
    }
    Ok(config)
  }

  /// API url from `SHOPFLOOR_API_URL`, if set and non-empty.
  pub fn api_url_from_env() -> Option<String> {
    std::env::var(API_URL_ENV)
      .ok()
      .filter(|url| !url.trim().is_empty())
  }

  pub fn cache_config(&self) -> CacheConfig {
    CacheConfig {
      fetch_timeout: self.api.timeout(),
    }
  }
}
