use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoggingError {
    /// Another global subscriber owns the process
    #[error("A tracing subscriber is already installed: {0}")]
    AlreadyInstalled(String),

    #[error("Unknown log level '{0}'")]
    UnknownLevel(String),

    #[error("Rejected filter directive: {0}")]
    BadDirective(String),
}
