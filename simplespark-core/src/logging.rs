//! Logging setup
//! Human-readable console output on stderr plus an optional JSON log file

use std::io;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging options resolved from config and CLI verbosity
#[derive(Debug, Clone)]
pub struct LogOptions {
    pub level: String,             // log level (trace, debug, info, warn, error)
    pub log_dir: Option<PathBuf>,  // directory for rolling JSON logs
    pub rotation: LogRotation,     // log rotation policy
}

/// Log rotation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRotation {
    Hourly,
    Daily,
    Never,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: None,
            rotation: LogRotation::Daily,
        }
    }
}

impl LogOptions {
    pub fn from_config(config: &crate::config::LoggingConfig) -> Self {
        Self {
            level: config.level.clone(),
            log_dir: config.log_dir.clone(),
            ..Default::default()
        }
    }

    /// Raise the level for each `-v` given on the command line
    pub fn with_verbosity(mut self, verbose: u8) -> Self {
        self.level = match verbose {
            0 => self.level,
            1 => "debug".to_string(),
            _ => "trace".to_string(),
        };
        self
    }

    /// Install the global subscriber. Keep the returned guard alive for the
    /// lifetime of the program, dropping it flushes the file writer.
    pub fn init(&self) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error>> {
        // RUST_LOG wins over the configured level
        let env_filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.level))?;

        // Console output goes to stderr so stdout stays clean for json/yaml
        let console_layer = fmt::layer()
            .with_target(false)
            .with_level(true)
            .with_writer(io::stderr);

        if let Some(ref dir) = self.log_dir {
            std::fs::create_dir_all(dir)?;

            let file_appender = match self.rotation {
                LogRotation::Hourly => rolling::hourly(dir, "simplespark.log"),
                LogRotation::Daily => rolling::daily(dir, "simplespark.log"),
                LogRotation::Never => rolling::never(dir, "simplespark.log"),
            };

            let (writer, guard) = non_blocking(file_appender);

            let file_layer = fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_ansi(false)
                .json()
                .with_writer(writer);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .with(file_layer)
                .try_init()?;

            tracing::debug!("Logging initialized - level: {}, dir: {:?}", self.level, dir);
            Ok(Some(guard))
        } else {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .try_init()?;

            tracing::debug!("Logging initialized - level: {}", self.level);
            Ok(None)
        }
    }
}

/// Log a machine lifecycle event with structured fields
#[macro_export]
macro_rules! log_machine_operation {
    ($op:expr, $machine:expr) => {
        tracing::info!(
            operation = $op,
            machine = $machine,
            "Machine operation"
        )
    };
    ($op:expr, $machine:expr, $($key:ident = $value:expr),+) => {
        tracing::info!(
            operation = $op,
            machine = $machine,
            $($key = $value),+,
            "Machine operation"
        )
    };
}

/// Log how long an operation took
#[macro_export]
macro_rules! log_performance {
    ($operation:expr, $duration_ms:expr) => {
        tracing::info!(
            operation = $operation,
            duration_ms = $duration_ms,
            "Performance metric"
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = LogOptions::default();
        assert_eq!(options.level, "info");
        assert!(options.log_dir.is_none());
        assert_eq!(options.rotation, LogRotation::Daily);
    }

    #[test]
    fn test_verbosity() {
        assert_eq!(LogOptions::default().with_verbosity(0).level, "info");
        assert_eq!(LogOptions::default().with_verbosity(1).level, "debug");
        assert_eq!(LogOptions::default().with_verbosity(3).level, "trace");
    }

    #[test]
    fn test_from_config() {
        let config = crate::config::LoggingConfig {
            level: "warn".to_string(),
            log_dir: Some(PathBuf::from("/tmp/simplespark-logs")),
        };
        let options = LogOptions::from_config(&config);
        assert_eq!(options.level, "warn");
        assert_eq!(options.log_dir, Some(PathBuf::from("/tmp/simplespark-logs")));
    }
}
