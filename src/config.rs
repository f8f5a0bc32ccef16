use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::TierError;
use crate::hashcheck::HashAlgorithm;

pub const CONFIG_FILE_NAME: &str = "tierfetch.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub archive: ArchiveSection,
    #[serde(default)]
    pub hashcheck: HashcheckSection,
    #[serde(default)]
    pub retrieval: RetrievalSection,
    #[serde(default)]
    pub condenser: CondenserSection,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ArchiveSection {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct HashcheckSection {
    #[serde(default)]
    pub algorithm: Option<String>,
    #[serde(default)]
    pub recheck_interval_days: Option<u32>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RetrievalSection {
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub retry_holdoff_secs: Option<u64>,
    #[serde(default)]
    pub copy_attempts: Option<u32>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct CondenserSection {
    #[serde(default)]
    pub size_threshold_bytes: Option<u64>,
    #[serde(default)]
    pub keep_backup: bool,
}

#[derive(Debug, Clone)]
pub struct ArchiveSettings {
    pub base_url: Option<String>,
    pub disabled: bool,
    pub timeout: Duration,
}

impl ArchiveSettings {
    /// Querying is possible only when enabled and pointed at a service.
    pub fn is_enabled(&self) -> bool {
        !self.disabled && self.base_url.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub archive: ArchiveSettings,
    pub hash_algorithm: HashAlgorithm,
    pub recheck_interval_days: u32,
    pub max_attempts: u32,
    pub retry_holdoff: Duration,
    pub copy_attempts: u32,
    pub condense_threshold_bytes: u64,
    pub keep_condenser_backup: bool,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            schema_version: 1,
            archive: ArchiveSettings {
                base_url: None,
                disabled: false,
                timeout: Duration::from_secs(60),
            },
            hash_algorithm: HashAlgorithm::Sha256,
            recheck_interval_days: 7,
            max_attempts: 3,
            retry_holdoff: Duration::from_secs(5),
            copy_attempts: 3,
            condense_threshold_bytes: 2 * 1024 * 1024 * 1024,
            keep_condenser_backup: false,
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load from `path`, else `./tierfetch.json`, else the per-user config directory.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, TierError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => Self::default_path().ok_or(TierError::MissingConfig)?,
        };

        let content = fs::read_to_string(&config_path)
            .map_err(|_| TierError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| TierError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    fn default_path() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Some(local);
        }
        BaseDirs::new()
            .map(|dirs| dirs.config_dir().join("tierfetch").join(CONFIG_FILE_NAME))
            .filter(|path| path.exists())
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, TierError> {
        let schema_version = config.schema_version.unwrap_or(1);

        let base_url = config
            .archive
            .base_url
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty());
        if let Some(url) = &base_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(TierError::InvalidConfig(format!(
                    "archive.base_url must be http(s): {url}"
                )));
            }
        }

        let hash_algorithm = match config.hashcheck.algorithm {
            Some(value) => value.parse()?,
            None => HashAlgorithm::Sha256,
        };

        let max_attempts = config.retrieval.max_attempts.unwrap_or(3);
        if max_attempts == 0 {
            return Err(TierError::InvalidConfig(
                "retrieval.max_attempts must be at least 1".to_string(),
            ));
        }

        Ok(ResolvedConfig {
            schema_version,
            archive: ArchiveSettings {
                base_url,
                disabled: config.archive.disabled,
                timeout: Duration::from_secs(config.archive.timeout_secs.unwrap_or(60)),
            },
            hash_algorithm,
            recheck_interval_days: config.hashcheck.recheck_interval_days.unwrap_or(7),
            max_attempts,
            retry_holdoff: Duration::from_secs(config.retrieval.retry_holdoff_secs.unwrap_or(5)),
            copy_attempts: config.retrieval.copy_attempts.unwrap_or(3).max(1),
            condense_threshold_bytes: config
                .condenser
                .size_threshold_bytes
                .unwrap_or(2 * 1024 * 1024 * 1024),
            keep_condenser_backup: config.condenser.keep_backup,
        })
    }
}
