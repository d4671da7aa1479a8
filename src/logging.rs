use anyhow::{anyhow, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Write to daily-rolling files here instead of stderr.
    pub directory: Option<PathBuf>,
    pub file_prefix: String,
    /// Used when `RUST_LOG` is unset.
    pub default_directive: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            directory: None,
            file_prefix: "groupdrive.log".to_string(),
            default_directive: "info".to_string(),
        }
    }
}

impl LogConfig {
    fn filter(&self) -> Result<EnvFilter> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => Ok(EnvFilter::try_new(&self.default_directive)?),
        }
    }
}

/// Installs the global subscriber. Keep the returned guard alive for as long
/// as file logging should keep flushing. Fails if a subscriber is already set.
pub fn init(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let filter = config.filter()?;

    match &config.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, &config.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .try_init()
                .map_err(|e| anyhow!(e))?;
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .try_init()
                .map_err(|e| anyhow!(e))?;
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_logs_to_stderr_at_info() {
        let config = LogConfig::default();
        assert!(config.directory.is_none());
        assert_eq!(config.default_directive, "info");
        assert!(config.filter().is_ok());
    }

    #[test]
    fn test_file_logging_installs_once() {
        let temp_dir = TempDir::new().unwrap();
        let config = LogConfig {
            directory: Some(temp_dir.path().to_path_buf()),
            ..LogConfig::default()
        };

        let guard = init(&config).unwrap();
        assert!(guard.is_some());
        tracing::info!("file logging ready");

        assert!(init(&LogConfig::default()).is_err());
    }
}
