//! Configuration for the synchronization engine
//!
//! Defaults, environment overrides (`EPOCHSYNC_<SECTION>_<KEY>`), TOML files and validation.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

use crate::logging::LogLevel;

mod error;

pub use error::ConfigError;

const DAY: Duration = Duration::from_secs(24 * 3600);

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    pub credentials: CredentialConfig,
    pub kdf: KdfConfig,
    pub logging: LoggingConfig,
}

/// Key-package lifetime policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialConfig {
    /// Rotate proactively when the current key-package expires within this window
    #[serde(with = "humantime_serde")]
    pub rotation_lookahead: Duration,

    /// Validity of a freshly generated key-package
    #[serde(with = "humantime_serde")]
    pub lifetime: Duration,
}

/// Argon2id cost parameters for deriving the at-rest state key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KdfConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    pub json_format: bool,
    pub with_timestamp: bool,
    pub with_target: bool,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self { rotation_lookahead: 7 * DAY, lifetime: 30 * DAY }
    }
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            memory_kib: 65536, // 64 MB
            iterations: 3,
            parallelism: 4,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), json_format: false, with_timestamp: true, with_target: true }
    }
}

fn parse_env<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnv { key: key.to_string(), reason: e.to_string() }),
        Err(_) => Ok(None),
    }
}

fn parse_env_duration(key: &str) -> Result<Option<Duration>, ConfigError> {
    match env::var(key) {
        Ok(raw) => humantime::parse_duration(&raw)
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnv { key: key.to_string(), reason: e.to_string() }),
        Err(_) => Ok(None),
    }
}

impl SyncConfig {
    /// Load configuration from environment variables on top of the defaults
    ///
    /// Example: `EPOCHSYNC_CREDENTIALS_ROTATION_LOOKAHEAD=3days`
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(lookahead) = parse_env_duration("EPOCHSYNC_CREDENTIALS_ROTATION_LOOKAHEAD")? {
            config.credentials.rotation_lookahead = lookahead;
        }
        if let Some(lifetime) = parse_env_duration("EPOCHSYNC_CREDENTIALS_LIFETIME")? {
            config.credentials.lifetime = lifetime;
        }

        if let Some(memory) = parse_env("EPOCHSYNC_KDF_MEMORY_KIB")? {
            config.kdf.memory_kib = memory;
        }
        if let Some(iterations) = parse_env("EPOCHSYNC_KDF_ITERATIONS")? {
            config.kdf.iterations = iterations;
        }
        if let Some(parallelism) = parse_env("EPOCHSYNC_KDF_PARALLELISM")? {
            config.kdf.parallelism = parallelism;
        }

        if let Ok(level) = env::var("EPOCHSYNC_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Some(json) = parse_env("EPOCHSYNC_LOG_JSON")? {
            config.logging.json_format = json;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;

        let config: Self = toml::from_str(&contents)?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.credentials.lifetime.is_zero() {
            return Err(ConfigError::CredentialPolicy(
                "credentials.lifetime must be greater than 0".to_string(),
            ));
        }

        if self.credentials.rotation_lookahead >= self.credentials.lifetime {
            return Err(ConfigError::CredentialPolicy(
                "credentials.rotation_lookahead must be shorter than credentials.lifetime"
                    .to_string(),
            ));
        }

        // Argon2 minimum is 8 KiB per lane
        if self.kdf.parallelism == 0
            || self.kdf.iterations == 0
            || self.kdf.memory_kib < 8 * self.kdf.parallelism
        {
            return Err(ConfigError::KdfParameters {
                memory_kib: self.kdf.memory_kib,
                iterations: self.kdf.iterations,
                parallelism: self.kdf.parallelism,
            });
        }

        if self.logging.level.parse::<LogLevel>().is_err() {
            return Err(ConfigError::UnknownLogLevel(self.logging.level.clone()));
        }

        Ok(())
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })
    }
}
