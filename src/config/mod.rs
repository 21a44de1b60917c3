//! Configuration loading for the linen tracking engine.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `LINENTRACK_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const ENV_PREFIX: &str = "LINENTRACK_";

/// Application configuration derived from `LINENTRACK_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    #[serde(default)]
    pub workflow: WorkflowConfig,
}

/// Tunables for barcode generation and scan input limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct WorkflowConfig {
    /// Prefix of generated delivery barcodes (default: `DLV`)
    ///
    /// Environment variable: `LINENTRACK_BARCODE_PREFIX`
    #[serde(default = "default_barcode_prefix")]
    pub barcode_prefix: String,

    /// Longest RFID tag accepted by registration and scans (default: 128)
    ///
    /// Environment variable: `LINENTRACK_MAX_TAG_LENGTH`
    #[serde(default = "default_max_tag_length")]
    pub max_tag_length: usize,

    /// Upper bound on tags accepted by a single scan request (default: 10000)
    ///
    /// Environment variable: `LINENTRACK_MAX_SCAN_TAGS`
    #[serde(default = "default_max_scan_tags")]
    pub max_scan_tags: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            barcode_prefix: default_barcode_prefix(),
            max_tag_length: default_max_tag_length(),
            max_scan_tags: default_max_scan_tags(),
        }
    }
}

impl WorkflowConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.barcode_prefix.is_empty()
            || !self
                .barcode_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric())
        {
            return Err(ConfigError::InvalidBarcodePrefix {
                value: self.barcode_prefix.clone(),
            });
        }

        if self.max_tag_length == 0 {
            return Err(ConfigError::InvalidMaxTagLength);
        }

        if self.max_scan_tags == 0 {
            return Err(ConfigError::InvalidMaxScanTags);
        }

        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            workflow: WorkflowConfig::default(),
        }
    }
}

impl AppConfig {
    /// Returns a redacted JSON representation (the database password is masked).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        config.database_url = redact_database_url(&config.database_url);
        serde_json::to_string_pretty(&config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::MissingDatabaseUrl);
        }

        if self.db_max_connections == 0 {
            return Err(ConfigError::InvalidDbMaxConnections);
        }

        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            return Err(ConfigError::InvalidLogFormat {
                value: self.log_format.clone(),
            });
        }

        self.workflow.validate()
    }
}

fn redact_database_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) if url.password().is_some() => {
            if url.set_password(Some("[REDACTED]")).is_ok() {
                url.to_string()
            } else {
                "[REDACTED]".to_string()
            }
        }
        Ok(_) => raw.to_string(),
        Err(_) => "[REDACTED]".to_string(),
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "sqlite://linentrack.db?mode=rwc".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_barcode_prefix() -> String {
    "DLV".to_string()
}

fn default_max_tag_length() -> usize {
    128
}

fn default_max_scan_tags() -> usize {
    10_000
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid value '{value}' for {key}")]
    InvalidNumber { key: &'static str, value: String },
    #[error("database url is missing; set LINENTRACK_DATABASE_URL")]
    MissingDatabaseUrl,
    #[error("database pool must allow at least one connection")]
    InvalidDbMaxConnections,
    #[error("log format '{value}' must be 'json' or 'pretty'")]
    InvalidLogFormat { value: String },
    #[error("barcode prefix '{value}' must be non-empty and alphanumeric")]
    InvalidBarcodePrefix { value: String },
    #[error("maximum tag length must be greater than zero")]
    InvalidMaxTagLength,
    #[error("maximum scan size must be greater than zero")]
    InvalidMaxScanTags,
}

/// Loads configuration using layered `.env` files and `LINENTRACK_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
    read_process_env: bool,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            read_process_env: true,
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self {
            base_dir,
            read_process_env: true,
        }
    }

    /// Only read dotenv files, ignoring the process environment.
    pub fn files_only(mut self) -> Self {
        self.read_process_env = false;
        self
    }

    /// Loads `.env`, `.env.local`, `.env.<profile>`, `.env.<profile>.local`,
    /// then the process environment, later sources winning.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        if self.read_process_env {
            for (key, value) in env::vars() {
                if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                    layered.insert(stripped.to_string(), value);
                }
            }
        }

        let profile = take_string(&mut layered, "PROFILE").unwrap_or(profile_hint);
        let log_level = take_string(&mut layered, "LOG_LEVEL").unwrap_or_else(default_log_level);
        let log_format =
            take_string(&mut layered, "LOG_FORMAT").unwrap_or_else(default_log_format);
        let database_url =
            take_string(&mut layered, "DATABASE_URL").unwrap_or_else(default_database_url);
        let db_max_connections = take_number(&mut layered, "DB_MAX_CONNECTIONS")?
            .unwrap_or_else(default_db_max_connections);
        let db_acquire_timeout_ms = take_number(&mut layered, "DB_ACQUIRE_TIMEOUT_MS")?
            .unwrap_or_else(default_db_acquire_timeout_ms);

        let workflow = WorkflowConfig {
            barcode_prefix: take_string(&mut layered, "BARCODE_PREFIX")
                .map(|prefix| prefix.to_ascii_uppercase())
                .unwrap_or_else(default_barcode_prefix),
            max_tag_length: take_number(&mut layered, "MAX_TAG_LENGTH")?
                .unwrap_or_else(default_max_tag_length),
            max_scan_tags: take_number(&mut layered, "MAX_SCAN_TAGS")?
                .unwrap_or_else(default_max_scan_tags),
        };

        let config = AppConfig {
            profile,
            log_level,
            log_format,
            database_url,
            db_max_connections,
            db_acquire_timeout_ms,
            workflow,
        };

        config.validate()?;
        Ok(config)
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let process_profile = if self.read_process_env {
            env::var(format!("{ENV_PREFIX}PROFILE")).ok()
        } else {
            None
        };
        let profile = process_profile
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn take_string(values: &mut BTreeMap<String, String>, key: &str) -> Option<String> {
    values
        .remove(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn take_number<T: std::str::FromStr>(
    values: &mut BTreeMap<String, String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match take_string(values, key) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber { key, value: raw }),
        None => Ok(None),
    }
}
