pub mod config;
pub mod core_sync;
pub mod logging;

#[cfg(test)]
pub mod test_utils;

pub use config::SyncConfig;
pub use core_sync::{AccountSession, SyncError, SyncResult};
pub use logging::{init_logging, LogLevel};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_exports() {
        let config = SyncConfig::default();
        assert_eq!(config.logging.level.parse::<LogLevel>(), Ok(LogLevel::Info));
        assert_eq!(config.credentials.rotation_lookahead, std::time::Duration::from_secs(7 * 24 * 3600));
    }
}
