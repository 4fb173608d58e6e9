//! Configuration management
//!
//! This module handles loading and saving the blobkit configuration file.
//! The file is TOML, stored at `~/.config/blobkit/config.toml` unless
//! `BLOBKIT_CONFIG_DIR` points somewhere else. Credentials are never stored
//! here; backends resolve them from their provider's usual chain.
//!
//! Changes to schema_version require migration support.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::multipart::{MultipartConfig, DEFAULT_EXPIRE_AFTER_SECS, DEFAULT_PART_SIZE};

/// Current configuration schema version
pub const SCHEMA_VERSION: u32 = 1;

/// Environment variable overriding the configuration directory
pub const CONFIG_DIR_ENV: &str = "BLOBKIT_CONFIG_DIR";

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Schema version for migration support
    pub schema_version: u32,

    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub multipart: MultipartSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            defaults: Defaults::default(),
            backend: BackendConfig::default(),
            multipart: MultipartSettings::default(),
        }
    }
}

/// Default settings for CLI behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Defaults {
    /// Output format: "human" or "json"
    #[serde(default = "default_output")]
    pub output: String,

    /// Show progress bars
    #[serde(default = "default_true")]
    pub progress: bool,
}

fn default_output() -> String {
    "human".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            progress: true,
        }
    }
}

/// Which backend implementation to construct
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    S3,
    /// Process-local backend; contents vanish on exit
    Memory,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::S3 => f.write_str("s3"),
            BackendKind::Memory => f.write_str("memory"),
        }
    }
}

/// The bucket and provider a backend is bound to
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,

    #[serde(default)]
    pub bucket: String,

    /// Custom endpoint for S3-compatible providers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Address buckets by path instead of virtual host
    #[serde(default)]
    pub path_style: bool,
}

impl BackendConfig {
    /// Check the section is usable before any backend is built
    pub fn validate(&self) -> Result<()> {
        if self.bucket.is_empty() {
            return Err(Error::Config("backend.bucket is not set".into()));
        }
        self.endpoint_url()?;
        Ok(())
    }

    /// Parsed endpoint; only http and https are accepted
    pub fn endpoint_url(&self) -> Result<Option<url::Url>> {
        let Some(endpoint) = &self.endpoint else {
            return Ok(None);
        };
        let url = url::Url::parse(endpoint)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "backend.endpoint must be http or https, got {}",
                url.scheme()
            )));
        }
        Ok(Some(url))
    }
}

/// Multipart upload tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultipartSettings {
    #[serde(default = "default_part_size")]
    pub part_size: u64,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Age in seconds after which `expire` reclaims an upload
    #[serde(default = "default_expire_after_secs")]
    pub expire_after_secs: u64,
}

fn default_part_size() -> u64 {
    DEFAULT_PART_SIZE
}

fn default_concurrency() -> usize {
    4
}

fn default_expire_after_secs() -> u64 {
    DEFAULT_EXPIRE_AFTER_SECS
}

impl Default for MultipartSettings {
    fn default() -> Self {
        Self {
            part_size: default_part_size(),
            concurrency: default_concurrency(),
            expire_after_secs: default_expire_after_secs(),
        }
    }
}

impl MultipartSettings {
    /// Part planning settings with provider limits applied
    pub fn to_config(&self) -> MultipartConfig {
        MultipartConfig::new()
            .part_size(self.part_size)
            .concurrency(self.concurrency)
    }

    pub fn expire_after(&self) -> Duration {
        Duration::from_secs(self.expire_after_secs)
    }
}

/// Configuration manager handles loading and saving config
#[derive(Debug)]
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a ConfigManager for `$BLOBKIT_CONFIG_DIR` or the platform
    /// config directory
    pub fn new() -> Result<Self> {
        let config_dir = match std::env::var_os(CONFIG_DIR_ENV) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => dirs::config_dir()
                .ok_or_else(|| Error::Config("Could not determine config directory".into()))?
                .join("blobkit"),
        };
        Ok(Self {
            config_path: config_dir.join("config.toml"),
        })
    }

    /// Create a ConfigManager with a custom path (useful for testing)
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the configuration file path
    pub fn config_path(&self) -> &PathBuf {
        &self.config_path
    }

    /// Load configuration from disk
    ///
    /// If the configuration file doesn't exist, returns a default configuration.
    pub fn load(&self) -> Result<Config> {
        if !self.config_path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(&self.config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        if config.schema_version < SCHEMA_VERSION {
            config = self.migrate(config)?;
        } else if config.schema_version > SCHEMA_VERSION {
            return Err(Error::Config(format!(
                "Configuration file version {} is newer than supported version {}. Please upgrade blobkit.",
                config.schema_version, SCHEMA_VERSION
            )));
        }

        Ok(config)
    }

    /// Save configuration to disk
    ///
    /// Creates parent directories if they don't exist.
    pub fn save(&self, config: &Config) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(config)?;
        std::fs::write(&self.config_path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&self.config_path, permissions)?;
        }

        Ok(())
    }

    fn migrate(&self, mut config: Config) -> Result<Config> {
        // Version 0 files predate schema_version and need no changes
        config.schema_version = SCHEMA_VERSION;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_config_manager() -> (ConfigManager, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        let manager = ConfigManager::with_path(config_path);
        (manager, temp_dir)
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.schema_version, SCHEMA_VERSION);
        assert_eq!(config.defaults.output, "human");
        assert!(config.defaults.progress);
        assert_eq!(config.backend.kind, BackendKind::S3);
        assert_eq!(config.multipart.part_size, DEFAULT_PART_SIZE);
        assert_eq!(config.multipart.expire_after(), Duration::from_secs(48 * 3600));
    }

    #[test]
    fn test_load_nonexistent_returns_default() {
        let (manager, _temp_dir) = temp_config_manager();
        let config = manager.load().unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_load() {
        let (manager, _temp_dir) = temp_config_manager();

        let mut config = Config::default();
        config.backend = BackendConfig {
            kind: BackendKind::S3,
            bucket: "archive".into(),
            endpoint: Some("http://localhost:9000".into()),
            region: Some("us-east-1".into()),
            path_style: true,
        };
        config.multipart.concurrency = 8;

        manager.save(&config).unwrap();
        let loaded = manager.load().unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let (manager, _temp_dir) = temp_config_manager();
        std::fs::write(
            manager.config_path(),
            r#"
            schema_version = 1

            [backend]
            kind = "memory"
            bucket = "scratch"
            "#,
        )
        .unwrap();

        let config = manager.load().unwrap();
        assert_eq!(config.backend.kind, BackendKind::Memory);
        assert_eq!(config.backend.bucket, "scratch");
        assert_eq!(config.multipart, MultipartSettings::default());
    }

    #[test]
    fn test_schema_version_too_new() {
        let (manager, _temp_dir) = temp_config_manager();

        let content = format!("schema_version = {}\n", SCHEMA_VERSION + 1);
        std::fs::write(manager.config_path(), content).unwrap();

        let result = manager.load();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("newer than supported"));
    }

    #[test]
    fn test_backend_validation() {
        let mut backend = BackendConfig::default();
        assert!(backend.validate().is_err());

        backend.bucket = "b".into();
        assert!(backend.validate().is_ok());

        backend.endpoint = Some("ftp://example.com".into());
        assert!(matches!(backend.validate(), Err(Error::Config(_))));

        backend.endpoint = Some("not a url".into());
        assert!(matches!(backend.validate(), Err(Error::InvalidUrl(_))));

        backend.endpoint = Some("https://s3.example.com".into());
        assert_eq!(
            backend.endpoint_url().unwrap().unwrap().host_str(),
            Some("s3.example.com")
        );
    }

    #[test]
    fn test_multipart_settings_are_clamped() {
        let settings = MultipartSettings {
            part_size: 1,
            concurrency: 0,
            expire_after_secs: 60,
        };
        let config = settings.to_config();
        assert_eq!(config.part_size, crate::multipart::MIN_PART_SIZE);
        assert_eq!(config.concurrency, 1);
    }
}
