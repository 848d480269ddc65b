//! Configuration loading and database path resolution

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the database location
pub const DATABASE_ENV_VAR: &str = "FSD_DATABASE";

/// Default number of candidate annotations handled per batch transaction
pub const DEFAULT_BATCH_CHUNK_SIZE: usize = 500;

/// Curation configuration (TOML)
///
/// ```toml
/// database_path = "/var/lib/fsd/fsd.db"
/// batch_chunk_size = 500
/// log_level = "info"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurationConfig {
    /// SQLite database file; resolved via [`resolve_database_path`] when unset
    pub database_path: Option<PathBuf>,
    /// Rows per transaction for bulk jobs
    pub batch_chunk_size: usize,
    /// Default tracing filter when RUST_LOG is not set
    pub log_level: String,
}

impl Default for CurationConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            batch_chunk_size: DEFAULT_BATCH_CHUNK_SIZE,
            log_level: "info".to_string(),
        }
    }
}

impl CurationConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: CurationConfig =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.batch_chunk_size == 0 {
            return Err(Error::Config("batch_chunk_size must be positive".to_string()));
        }
        Ok(())
    }
}

/// Where a loaded configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// File given on the command line
    Explicit(PathBuf),
    /// Platform config file found on disk
    Platform(PathBuf),
    /// No file; built-in defaults
    Defaults,
}

/// Load configuration and report its source, without logging
///
/// An explicitly given file must exist and parse. Without one, the platform
/// config file is used if present; a missing file means defaults. Binaries
/// call this before their subscriber is installed and log the source after.
pub fn load_config_with_source(explicit_path: Option<&Path>) -> Result<(CurationConfig, ConfigSource)> {
    if let Some(path) = explicit_path {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Cannot read {}: {}", path.display(), e)))?;
        let config = CurationConfig::from_toml_str(&content)?;
        return Ok((config, ConfigSource::Explicit(path.to_path_buf())));
    }

    match locate_config_file() {
        Some(path) => {
            let content = std::fs::read_to_string(&path)?;
            let config = CurationConfig::from_toml_str(&content)?;
            Ok((config, ConfigSource::Platform(path)))
        }
        None => Ok((CurationConfig::default(), ConfigSource::Defaults)),
    }
}

/// Load configuration, logging where it came from
pub fn load_config(explicit_path: Option<&Path>) -> Result<CurationConfig> {
    let (config, source) = load_config_with_source(explicit_path)?;
    log_config_source(&source);
    Ok(config)
}

pub fn log_config_source(source: &ConfigSource) {
    match source {
        ConfigSource::Explicit(path) | ConfigSource::Platform(path) => {
            info!("Loaded config file {}", path.display())
        }
        ConfigSource::Defaults => warn!("No config file found, using defaults"),
    }
}

/// Database path resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_database_path(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    config: &CurationConfig,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &config.database_path {
        return path.clone();
    }

    default_database_path()
}

/// Platform config file: ~/.config/fsd/config.toml, then /etc/fsd/config.toml
fn locate_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("fsd").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(unix) {
        let system_config = PathBuf::from("/etc/fsd/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Get OS-dependent default database path
pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("fsd").join("fsd.db"))
        .unwrap_or_else(|| PathBuf::from("./fsd_data/fsd.db"))
}
