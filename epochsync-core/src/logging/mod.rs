//! Logging setup
//!
//! The engine only emits `tracing` events under the [`ENGINE_TARGET`] target. Installing a
//! subscriber is left to the embedding application; tests normally run without one.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LoggingConfig, SyncConfig};

mod error;
mod level;

pub use error::LoggingError;
pub use level::LogLevel;

/// Target of every event this crate emits
pub const ENGINE_TARGET: &str = "epochsync_core";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Subscriber settings
///
/// Engine events are filtered at `level`; events from other crates (the storage or
/// transport stack of the embedding application) at `dependency_level`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub level: LogLevel,
    pub dependency_level: LogLevel,
    pub format: LogFormat,
    pub with_timestamp: bool,
    pub with_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            dependency_level: LogLevel::Warn,
            format: LogFormat::Text,
            with_timestamp: true,
            with_target: true,
        }
    }
}

impl LogConfig {
    pub fn new(level: LogLevel) -> Self {
        Self { level, ..Self::default() }
    }

    pub fn dependency_level(mut self, level: LogLevel) -> Self {
        self.dependency_level = level;
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_timestamp(mut self, enabled: bool) -> Self {
        self.with_timestamp = enabled;
        self
    }

    pub fn with_target(mut self, enabled: bool) -> Self {
        self.with_target = enabled;
        self
    }

    /// Filter directive applied when `RUST_LOG` is not set
    pub fn directive(&self) -> String {
        format!("{},{}={}", self.dependency_level, ENGINE_TARGET, self.level)
    }

    fn env_filter(&self) -> Result<EnvFilter, LoggingError> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        EnvFilter::try_new(self.directive()).map_err(|e| LoggingError::BadDirective(e.to_string()))
    }
}

impl TryFrom<&LoggingConfig> for LogConfig {
    type Error = LoggingError;

    fn try_from(config: &LoggingConfig) -> Result<Self, Self::Error> {
        Ok(Self {
            level: config.level.parse()?,
            format: if config.json_format { LogFormat::Json } else { LogFormat::Text },
            with_timestamp: config.with_timestamp,
            with_target: config.with_target,
            ..Self::default()
        })
    }
}

/// Install the default subscriber: engine at `info`, everything else at `warn`
///
/// # Example
/// ```
/// use epochsync_core::logging::init_logging;
///
/// init_logging().expect("Failed to initialize logging");
/// ```
pub fn init_logging() -> Result<(), LoggingError> {
    init_logging_with_config(LogConfig::default())
}

/// Install a subscriber built from the `[logging]` section of an engine config
pub fn init_logging_from(config: &SyncConfig) -> Result<(), LoggingError> {
    init_logging_with_config(LogConfig::try_from(&config.logging)?)
}

/// Install a subscriber with explicit settings
///
/// `RUST_LOG` takes precedence over the configured levels when set.
///
/// # Example
/// ```
/// use epochsync_core::logging::{init_logging_with_config, LogConfig, LogFormat, LogLevel};
///
/// let config = LogConfig::new(LogLevel::Debug).format(LogFormat::Json).with_target(false);
/// init_logging_with_config(config).expect("Failed to initialize logging");
/// ```
pub fn init_logging_with_config(config: LogConfig) -> Result<(), LoggingError> {
    let filter = config.env_filter()?;
    let layer = fmt::layer().with_target(config.with_target);
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match (config.format, config.with_timestamp) {
        (LogFormat::Json, true) => registry.with(layer.json()).try_init(),
        (LogFormat::Json, false) => registry.with(layer.json().without_time()).try_init(),
        (LogFormat::Text, true) => registry.with(layer).try_init(),
        (LogFormat::Text, false) => registry.with(layer.without_time()).try_init(),
    };
    installed.map_err(|e| LoggingError::AlreadyInstalled(e.to_string()))?;

    tracing::debug!(directive = %config.directive(), format = ?config.format, "logging initialized");
    Ok(())
}
