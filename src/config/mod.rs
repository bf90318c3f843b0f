//! Configuration for the nowcasting pipeline.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

use crate::noise::BlendStrategy;
use crate::utils::error::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Epidata API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Durable cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Geographic reference table configuration
    #[serde(default)]
    pub geo: GeoConfig,

    /// Sensor fitting configuration
    #[serde(default)]
    pub sensor: SensorConfig,

    /// Fusion configuration
    #[serde(default)]
    pub fusion: FusionConfig,
}

/// Epidata API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Covidcast endpoint URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Timeout for API requests in seconds
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

/// Durable cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Enable/disable API response memoization. The statespace memo is not
    /// affected; it is always on.
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,

    /// Directory holding all cache files
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,

    /// Base name of the response cache file
    #[serde(default = "default_response_base")]
    pub response_base: String,

    /// Base name of the statespace cache files
    #[serde(default = "default_statespace_base")]
    pub statespace_base: String,

    /// Minimum seconds between two physical writes of the response cache
    /// file. Default 2.
    #[serde(default = "default_persist_debounce_secs")]
    pub persist_debounce_secs: u64,
}

/// Geographic reference table configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoConfig {
    /// CSV mapping metro areas to their counties
    #[serde(default = "default_metro_table")]
    pub metro_table: PathBuf,

    /// CSV mapping states to their counties
    #[serde(default = "default_state_table")]
    pub state_table: PathBuf,
}

/// Sensor fitting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    /// A signal this many or more days short of the training window fails
    /// the fit instead of subsetting truth. Default 14.
    #[serde(default = "default_max_missing_days")]
    pub max_missing_days: usize,

    /// Autoregression lag order. Default 3.
    #[serde(default = "default_ar_lag_order")]
    pub ar_lag_order: usize,

    /// Whether the autoregression fits an intercept. Default false.
    #[serde(default)]
    pub ar_include_intercept: bool,

    /// L2 penalty strength for the autoregression. Default 0.1.
    #[serde(default = "default_ar_l2_penalty")]
    pub ar_l2_penalty: f64,
}

/// Fusion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionConfig {
    /// Covariance blend applied by the noise estimator
    #[serde(default)]
    pub blend: BlendStrategy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            cache: CacheConfig::default(),
            geo: GeoConfig::default(),
            sensor: SensorConfig::default(),
            fusion: FusionConfig::default(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            dir: default_cache_dir(),
            response_base: default_response_base(),
            statespace_base: default_statespace_base(),
            persist_debounce_secs: default_persist_debounce_secs(),
        }
    }
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            metro_table: default_metro_table(),
            state_table: default_state_table(),
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            max_missing_days: default_max_missing_days(),
            ar_lag_order: default_ar_lag_order(),
            ar_include_intercept: false,
            ar_l2_penalty: default_ar_l2_penalty(),
        }
    }
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self { blend: BlendStrategy::default() }
    }
}

// --------- Helper default functions for serde ---------
fn default_base_url() -> String {
    "https://api.delphi.cmu.edu/epidata/covidcast/".to_string()
}
fn default_timeout_seconds() -> u64 {
    60
}
fn default_cache_enabled() -> bool {
    true
}
fn default_cache_dir() -> PathBuf {
    PathBuf::from("data/cache")
}
fn default_response_base() -> String {
    "fusion.json".to_string()
}
fn default_statespace_base() -> String {
    "statespace".to_string()
}
fn default_persist_debounce_secs() -> u64 {
    2
}
fn default_metro_table() -> PathBuf {
    PathBuf::from("data/fips_msa_table.csv")
}
fn default_state_table() -> PathBuf {
    PathBuf::from("data/fips_state_table.csv")
}
fn default_max_missing_days() -> usize {
    14
}
fn default_ar_lag_order() -> usize {
    3
}
fn default_ar_l2_penalty() -> f64 {
    0.1
}

impl Config {
    /// Load configuration from a specific file path
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(|e| {
            Error::ConfigError(format!("Failed to read config file {:?}: {}", path.as_ref(), e))
        })?;
        let mut cfg: Self = toml::from_str(&content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config file: {}", e)))?;
        cfg.merge_env()?;
        Ok(cfg)
    }

    /// Save the configuration to a file
    pub fn save<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {}", e)))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::ConfigError(format!("Failed to create directory {:?}: {}", parent, e))
            })?;
        }
        std::fs::write(path, content).map_err(|e| {
            Error::ConfigError(format!("Failed to write config file {:?}: {}", path, e))
        })?;
        Ok(())
    }

    /// Validate the configuration for required fields and reasonable values
    pub fn validate(&self) -> Result<()> {
        if self.api.base_url.trim().is_empty() {
            return Err(Error::ConfigError("API base URL must be set".to_string()));
        }
        if self.api.timeout_seconds == 0 {
            return Err(Error::ConfigError("api.timeout_seconds must be > 0".to_string()));
        }
        if self.cache.response_base.trim().is_empty()
            || self.cache.statespace_base.trim().is_empty()
        {
            return Err(Error::ConfigError("cache base names must be set".to_string()));
        }
        if self.sensor.max_missing_days == 0 {
            return Err(Error::ConfigError(
                "sensor.max_missing_days must be > 0".to_string(),
            ));
        }
        if self.sensor.ar_lag_order == 0 {
            return Err(Error::ConfigError("sensor.ar_lag_order must be > 0".to_string()));
        }
        if self.sensor.ar_l2_penalty < 0.0 {
            return Err(Error::ConfigError(
                "sensor.ar_l2_penalty cannot be negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        // Try to load from current directory
        if let Ok(config) = Self::from_file("config.toml") {
            return Ok(config);
        }

        // Try to load from user config directory
        if let Some(mut path) = dirs::config_dir() {
            path.push("nowcast");
            path.push("config.toml");
            if path.exists() {
                return Self::from_file(path);
            }
        }

        // Return default config if no config file found
        let mut config = Self::default();
        config.merge_env()?;
        Ok(config)
    }

    /// Merge environment variables into the configuration
    pub fn merge_env(&mut self) -> Result<()> {
        if let Ok(base_url) = env::var("NOWCAST_API_URL") {
            self.api.base_url = base_url;
        }

        if let Ok(cache_dir) = env::var("NOWCAST_CACHE_DIR") {
            self.cache.dir = PathBuf::from(cache_dir);
        }

        Ok(())
    }
}
