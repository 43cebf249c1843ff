/*!
 * Configuration support for the CMS PUF aggregation library
 *
 * Provides runtime configuration options for customizing scan behavior.
 */

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Global configuration for the aggregation library
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PufConfig {
    /// Whether to show progress bars during long scans
    #[serde(default = "default_enable_progress_bar")]
    pub enable_progress_bar: bool,

    /// Records read from a CSV per streaming chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Soft cap on filter-matching rows scanned per extract (None = unbounded).
    /// Checked only between chunks, so a scan may finish the chunk in flight.
    #[serde(default = "default_max_scan_rows")]
    pub max_scan_rows: Option<u64>,

    /// Default cap on output rows for ranked reports
    #[serde(default = "default_max_rows")]
    pub default_max_rows: usize,

    /// Whether to skip rows that fail CSV record parsing
    #[serde(default = "default_skip_invalid_records")]
    pub skip_invalid_records: bool,

    /// Number of threads for parallel operations (None = use all available)
    #[serde(default)]
    pub parallel_threads: Option<usize>,
}

impl Default for PufConfig {
    fn default() -> Self {
        Self {
            enable_progress_bar: default_enable_progress_bar(),
            chunk_size: default_chunk_size(),
            max_scan_rows: default_max_scan_rows(),
            default_max_rows: default_max_rows(),
            skip_invalid_records: default_skip_invalid_records(),
            parallel_threads: None,
        }
    }
}

// Default value functions for serde
fn default_enable_progress_bar() -> bool {
    true
}

fn default_chunk_size() -> usize {
    250_000
}

fn default_max_scan_rows() -> Option<u64> {
    Some(5_000_000)
}

fn default_max_rows() -> usize {
    crate::constants::DEFAULT_MAX_ROWS
}

fn default_skip_invalid_records() -> bool {
    true
}

impl PufConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables
    ///
    /// Supported environment variables:
    /// - `PUF_PROGRESS_BAR`: "true" or "false"
    /// - `PUF_CHUNK_SIZE`: number of records per chunk
    /// - `PUF_MAX_SCAN_ROWS`: number, or "none" for unbounded
    /// - `PUF_MAX_ROWS`: default output row cap
    /// - `PUF_SKIP_INVALID`: "true" or "false"
    /// - `PUF_PARALLEL_THREADS`: number or "auto"
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("PUF_PROGRESS_BAR") {
            config.enable_progress_bar = val.to_lowercase() == "true";
        }

        if let Ok(val) = std::env::var("PUF_CHUNK_SIZE") {
            if let Ok(size) = val.parse() {
                config.chunk_size = size;
            }
        }

        if let Ok(val) = std::env::var("PUF_MAX_SCAN_ROWS") {
            config.max_scan_rows = match val.to_lowercase().as_str() {
                "none" | "0" => None,
                num => num.parse().ok().or(config.max_scan_rows),
            };
        }

        if let Ok(val) = std::env::var("PUF_MAX_ROWS") {
            if let Ok(rows) = val.parse() {
                config.default_max_rows = rows;
            }
        }

        if let Ok(val) = std::env::var("PUF_SKIP_INVALID") {
            config.skip_invalid_records = val.to_lowercase() == "true";
        }

        if let Ok(val) = std::env::var("PUF_PARALLEL_THREADS") {
            config.parallel_threads = match val.to_lowercase().as_str() {
                "auto" | "0" => None,
                num => num.parse().ok(),
            };
        }

        config
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| crate::PufError::Configuration {
                message: format!("Failed to parse config file: {}", e),
                suggestion: Some("Check that the file is valid TOML format".to_string()),
            })?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> crate::Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| crate::PufError::Configuration {
                message: format!("Failed to serialize config: {}", e),
                suggestion: None,
            })?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns `~/.config/cms-puf/config.toml` on Unix-like systems
    /// or `%APPDATA%\cms-puf\config.toml` on Windows
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "cms-puf")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load configuration from the default location, environment, or defaults
    ///
    /// Priority order:
    /// 1. Default config file (if exists)
    /// 2. Environment variables
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Some(config_path) = Self::default_config_path() {
            if config_path.exists() {
                if let Ok(config) = Self::from_file(&config_path) {
                    return config;
                }
            }
        }

        Self::from_env()
    }

    /// Create a configuration tuned for large extracts on batch machines
    pub fn batch() -> Self {
        Self {
            enable_progress_bar: false,
            chunk_size: 500_000,
            max_scan_rows: None,
            default_max_rows: crate::constants::DEFAULT_MAX_ROWS,
            skip_invalid_records: true,
            parallel_threads: None,
        }
    }
}

// Global configuration support
use std::sync::RwLock;

lazy_static::lazy_static! {
    static ref GLOBAL_CONFIG: RwLock<Option<PufConfig>> = RwLock::new(None);
}

/// Set the global configuration
pub fn set_global_config(config: PufConfig) {
    if let Ok(mut slot) = GLOBAL_CONFIG.write() {
        *slot = Some(config);
    }
}

/// Get the global configuration (or default if not set)
pub fn global_config() -> PufConfig {
    GLOBAL_CONFIG
        .read()
        .ok()
        .and_then(|slot| slot.as_ref().cloned())
        .unwrap_or_else(PufConfig::load)
}

/// Clear the global configuration
pub fn clear_global_config() {
    if let Ok(mut slot) = GLOBAL_CONFIG.write() {
        *slot = None;
    }
}

/// Builder for customizing configuration
pub struct ConfigBuilder {
    config: PufConfig,
}

impl ConfigBuilder {
    /// Start building a new configuration
    pub fn new() -> Self {
        Self {
            config: PufConfig::default(),
        }
    }

    /// Set progress bar enabled
    pub fn progress_bar(mut self, enabled: bool) -> Self {
        self.config.enable_progress_bar = enabled;
        self
    }

    /// Set records per streaming chunk
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the soft scan cap
    pub fn max_scan_rows(mut self, cap: Option<u64>) -> Self {
        self.config.max_scan_rows = cap;
        self
    }

    /// Set the default output row cap
    pub fn default_max_rows(mut self, rows: usize) -> Self {
        self.config.default_max_rows = rows;
        self
    }

    /// Set skip invalid records
    pub fn skip_invalid_records(mut self, skip: bool) -> Self {
        self.config.skip_invalid_records = skip;
        self
    }

    /// Set number of parallel threads
    pub fn parallel_threads(mut self, threads: Option<usize>) -> Self {
        self.config.parallel_threads = threads;
        self
    }

    /// Build the configuration
    pub fn build(self) -> PufConfig {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
