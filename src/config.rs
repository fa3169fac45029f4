use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{SyncError, SyncResult};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub market: MarketConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub peer: PeerConfig,
  #[serde(default)]
  pub store: StoreConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketConfig {
  /// Marketplace REST base, e.g. "https://api.example-market.io/v0.1"
  pub base_url: String,
  /// Static API key; the CURIO_MARKET_KEY environment variable overrides
  /// this when set.
  pub api_key: Option<String>,
  #[serde(default = "default_page_size")]
  pub page_size: usize,
  #[serde(default = "default_request_timeout")]
  pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  /// Debounce window for remote-event invalidation bursts.
  #[serde(default = "default_debounce_ms")]
  pub debounce_ms: u64,
  /// Grace period after on-chain confirmation before the settlement
  /// fan-out runs, masking read-after-write lag in the marketplace's
  /// read replica. A tuning knob, not a correctness guarantee.
  #[serde(default = "default_settlement_lag")]
  pub settlement_lag_secs: u64,
  /// Age after which fresh entries refetch on their next read. Absent
  /// means entries only go stale through explicit invalidation.
  pub stale_after_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PeerConfig {
  /// Agent on the peer host that publishes marketplace deltas.
  #[serde(default = "default_peer_app")]
  pub app: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
  /// SQLite database path. Defaults to curio/curio.db under the
  /// platform data directory.
  pub path: Option<PathBuf>,
}

fn default_page_size() -> usize {
  50
}

fn default_request_timeout() -> u64 {
  30
}

fn default_debounce_ms() -> u64 {
  300
}

fn default_settlement_lag() -> u64 {
  20
}

fn default_peer_app() -> String {
  "exchange".to_string()
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      debounce_ms: default_debounce_ms(),
      settlement_lag_secs: default_settlement_lag(),
      stale_after_secs: None,
    }
  }
}

impl Default for PeerConfig {
  fn default() -> Self {
    Self {
      app: default_peer_app(),
    }
  }
}

impl SyncConfig {
  pub fn debounce_window(&self) -> Duration {
    Duration::from_millis(self.debounce_ms)
  }

  pub fn settlement_lag(&self) -> Duration {
    Duration::from_secs(self.settlement_lag_secs)
  }

  pub fn stale_after(&self) -> Option<Duration> {
    self.stale_after_secs.map(Duration::from_secs)
  }
}

impl StoreConfig {
  pub fn resolved_path(&self) -> SyncResult<PathBuf> {
    if let Some(path) = &self.path {
      return Ok(path.clone());
    }
    let data_dir = dirs::data_dir()
      .ok_or_else(|| SyncError::Config("no platform data directory available".to_string()))?;
    Ok(data_dir.join("curio").join("curio.db"))
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./curio.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/curio/config.yaml
  /// 4. ~/.config/curio/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> SyncResult<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(SyncError::Config(format!(
          "config file not found: {}",
          p.display()
        )));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(SyncError::Config(
        "no configuration file found; create one at ~/.config/curio/config.yaml".to_string(),
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("curio.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("curio").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> SyncResult<Self> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
      SyncError::Config(format!("failed to read config file {}: {}", path.display(), e))
    })?;
    Self::from_yaml(&contents)
      .map_err(|e| SyncError::Config(format!("{}: {}", path.display(), e)))
  }

  pub fn from_yaml(contents: &str) -> SyncResult<Self> {
    let config: Config = serde_yaml::from_str(contents)
      .map_err(|e| SyncError::Config(format!("failed to parse config: {e}")))?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> SyncResult<()> {
    // The pager's end-of-data heuristic compares page length against
    // page_size; zero would terminate every listing after one page.
    if self.market.page_size == 0 {
      return Err(SyncError::Config(
        "market.page_size must be at least 1".to_string(),
      ));
    }
    Ok(())
  }

  /// Marketplace API key, preferring the CURIO_MARKET_KEY environment
  /// variable over the config file.
  pub fn market_api_key(&self) -> Option<String> {
    std::env::var("CURIO_MARKET_KEY")
      .ok()
      .or_else(|| self.market.api_key.clone())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_applies_defaults() {
    let config =
      Config::from_yaml("market:\n  base_url: https://api.example-market.io/v0.1\n").unwrap();

    assert_eq!(config.market.page_size, 50);
    assert_eq!(config.market.request_timeout_secs, 30);
    assert_eq!(config.sync.debounce_ms, 300);
    assert_eq!(config.sync.settlement_lag_secs, 20);
    assert!(config.sync.stale_after_secs.is_none());
    assert_eq!(config.peer.app, "exchange");
    assert!(config.store.path.is_none());
  }

  #[test]
  fn test_full_config_overrides() {
    let config = Config::from_yaml(
      "market:\n  base_url: https://api.example-market.io/v0.1\n  api_key: k\n  page_size: 25\n\
       sync:\n  debounce_ms: 150\n  settlement_lag_secs: 5\n  stale_after_secs: 120\n\
       peer:\n  app: bazaar\n\
       store:\n  path: /tmp/curio-test.db\n",
    )
    .unwrap();

    assert_eq!(config.market.page_size, 25);
    assert_eq!(config.sync.debounce_window(), Duration::from_millis(150));
    assert_eq!(config.sync.settlement_lag(), Duration::from_secs(5));
    assert_eq!(config.sync.stale_after(), Some(Duration::from_secs(120)));
    assert_eq!(config.peer.app, "bazaar");
    assert_eq!(
      config.store.resolved_path().unwrap(),
      PathBuf::from("/tmp/curio-test.db")
    );
  }

  #[test]
  fn test_zero_page_size_rejected() {
    let err = Config::from_yaml(
      "market:\n  base_url: https://api.example-market.io/v0.1\n  page_size: 0\n",
    )
    .unwrap_err();
    assert!(matches!(err, SyncError::Config(_)));
  }
}
