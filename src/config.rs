// src/config.rs
//! Configuration file parsing for the marketplace
//!
//! Supports TOML configuration files with the following sections:
//! - [storage] - Catalog directory
//! - [installer] - Worker pool width, trust policy gate
//! - [scanner] - Vulnerability scanner binary, timeout, cache
//! - [[repositories]] - Remote recipe repositories
//! - [[trusted_keys]] - Publisher keys trusted for signature verification
//!
//! Every field has a default, so an empty file is a valid configuration.

use crate::error::{Error, Result};
use crate::installer::{DEFAULT_WORKERS, InstallerOptions};
use crate::recipe::TrustLevel;
use crate::repository::{DEFAULT_SYNC_INTERVAL_HOURS, RemoteRepository};
use crate::security::{DEFAULT_CACHE_TTL_HOURS, DEFAULT_MIN_TRUST_SCORE};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/debvisor/marketplace.toml";

/// TOML configuration file structure
#[derive(Debug, Default, Deserialize)]
pub struct MarketplaceConfig {
    #[serde(default)]
    pub storage: StorageSection,

    #[serde(default)]
    pub installer: InstallerSection,

    #[serde(default)]
    pub scanner: ScannerSection,

    #[serde(default)]
    pub repositories: Vec<RepositorySection>,

    #[serde(default)]
    pub trusted_keys: Vec<TrustedKeySection>,
}

/// Storage configuration section
#[derive(Debug, Deserialize)]
pub struct StorageSection {
    /// Directory holding `catalog.json`
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("/var/lib/debvisor/marketplace")
}

/// Installer configuration section
#[derive(Debug, Deserialize)]
pub struct InstallerSection {
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Reject recipes whose trust score is below `min_trust_score`
    #[serde(default)]
    pub enforce_trust_policy: bool,

    #[serde(default = "default_min_trust_score")]
    pub min_trust_score: u32,
}

impl Default for InstallerSection {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            enforce_trust_policy: false,
            min_trust_score: default_min_trust_score(),
        }
    }
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_min_trust_score() -> u32 {
    DEFAULT_MIN_TRUST_SCORE
}

/// Scanner configuration section
#[derive(Debug, Deserialize)]
pub struct ScannerSection {
    #[serde(default = "default_scanner_binary")]
    pub binary: String,

    #[serde(default = "default_scan_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_hours: i64,

    /// Fail scans when the scanner is unavailable instead of using a mock result
    #[serde(default)]
    pub strict: bool,
}

impl Default for ScannerSection {
    fn default() -> Self {
        Self {
            binary: default_scanner_binary(),
            timeout_secs: default_scan_timeout(),
            cache_ttl_hours: default_cache_ttl(),
            strict: false,
        }
    }
}

impl ScannerSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_scanner_binary() -> String {
    "trivy".to_string()
}

fn default_scan_timeout() -> u64 {
    300
}

fn default_cache_ttl() -> i64 {
    DEFAULT_CACHE_TTL_HOURS
}

/// A remote repository entry
#[derive(Debug, Deserialize)]
pub struct RepositorySection {
    pub name: String,
    pub url: String,

    #[serde(default = "default_repo_trust")]
    pub trust_level: TrustLevel,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_sync_interval")]
    pub sync_interval_hours: u64,

    /// Path to the repository's signing key
    #[serde(default)]
    pub public_key: Option<PathBuf>,
}

impl RepositorySection {
    /// Build the runtime repository, reading its key file if configured
    pub fn to_repository(&self) -> Result<RemoteRepository> {
        let public_key = match &self.public_key {
            Some(path) => Some(read_key(path)?),
            None => None,
        };

        Ok(RemoteRepository {
            name: self.name.clone(),
            url: self.url.clone(),
            enabled: self.enabled,
            trust_level: self.trust_level,
            sync_interval_hours: self.sync_interval_hours,
            last_sync: None,
            public_key,
        })
    }
}

fn default_repo_trust() -> TrustLevel {
    TrustLevel::Community
}

fn default_true() -> bool {
    true
}

fn default_sync_interval() -> u64 {
    DEFAULT_SYNC_INTERVAL_HOURS
}

/// A publisher key trusted for recipe signatures
#[derive(Debug, Deserialize)]
pub struct TrustedKeySection {
    pub key_id: String,
    /// PEM or base64 encoded public key file
    pub path: PathBuf,
}

impl TrustedKeySection {
    pub fn read(&self) -> Result<String> {
        read_key(&self.path)
    }
}

fn read_key(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| Error::ConfigError(format!("Failed to read key file {}: {e}", path.display())))
}

impl MarketplaceConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("Failed to read config file {}: {e}", path.display()))
        })?;

        Self::from_toml(&content)
            .map_err(|e| Error::ConfigError(format!("{}: {e}", path.display())))
    }

    /// Load `path` if given, the default location if it exists, else defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::load(Path::new(DEFAULT_CONFIG_PATH))
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse and validate TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: MarketplaceConfig = toml::from_str(content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.installer.workers == 0 {
            return Err(Error::ConfigError(
                "installer.workers must be at least 1".to_string(),
            ));
        }

        if self.installer.min_trust_score > 100 {
            return Err(Error::ConfigError(format!(
                "installer.min_trust_score must be between 0 and 100, got {}",
                self.installer.min_trust_score
            )));
        }

        if self.scanner.timeout_secs == 0 {
            return Err(Error::ConfigError(
                "scanner.timeout_secs must be positive".to_string(),
            ));
        }

        if self.scanner.cache_ttl_hours < 0 {
            return Err(Error::ConfigError(
                "scanner.cache_ttl_hours must not be negative".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for repo in &self.repositories {
            if !names.insert(repo.name.as_str()) {
                return Err(Error::ConfigError(format!(
                    "Duplicate repository name: {}",
                    repo.name
                )));
            }
            if !(repo.url.starts_with("http://") || repo.url.starts_with("https://")) {
                return Err(Error::ConfigError(format!(
                    "Repository {} has a non-HTTP url: {}",
                    repo.name, repo.url
                )));
            }
        }

        Ok(())
    }

    pub fn installer_options(&self) -> InstallerOptions {
        InstallerOptions {
            workers: self.installer.workers,
            enforce_trust_policy: self.installer.enforce_trust_policy,
            min_trust_score: self.installer.min_trust_score,
        }
    }
}
