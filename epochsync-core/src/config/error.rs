//! Configuration error types

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Cannot render config as TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// An `EPOCHSYNC_*` variable was set but could not be parsed
    #[error("Invalid value for {key}: {reason}")]
    InvalidEnv { key: String, reason: String },

    #[error("Invalid credential policy: {0}")]
    CredentialPolicy(String),

    #[error("Invalid KDF parameters: memory_kib={memory_kib} iterations={iterations} parallelism={parallelism}")]
    KdfParameters { memory_kib: u32, iterations: u32, parallelism: u32 },

    #[error("Unknown log level '{0}'")]
    UnknownLogLevel(String),
}

impl ConfigError {
    /// Whether the error came from the values themselves rather than from file access
    pub fn is_invalid_setting(&self) -> bool {
        matches!(
            self,
            ConfigError::InvalidEnv { .. }
                | ConfigError::CredentialPolicy(_)
                | ConfigError::KdfParameters { .. }
                | ConfigError::UnknownLogLevel(_)
        )
    }
}
