//! Structured logging via the `tracing` crate.
//!
//! During `train` runs stdout is reserved for the JSONL event stream, so the
//! subscriber is pointed at stderr instead.

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: LogLevel,
    /// Whether to include target (module path)
    pub include_target: bool,
    /// Whether to use ANSI colors
    pub ansi_colors: bool,
    /// Write logs to stderr instead of stdout
    pub to_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            include_target: false,
            ansi_colors: true,
            to_stderr: false,
        }
    }
}

impl LogConfig {
    /// Config for the training worker: stderr only, no colors, so the
    /// process can be driven by a supervisor that parses stdout.
    pub fn worker() -> Self {
        Self {
            level: LogLevel::Info,
            include_target: false,
            ansi_colors: false,
            to_stderr: true,
        }
    }

    /// Verbose config for debugging
    pub fn verbose() -> Self {
        Self {
            level: LogLevel::Debug,
            include_target: true,
            ansi_colors: true,
            to_stderr: false,
        }
    }
}

/// Log level enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn to_tracing_level(&self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

/// Initialize the global subscriber from the given configuration.
///
/// Safe to call more than once; subsequent calls are no-ops.
pub fn init_logging(config: &LogConfig) -> Result<(), String> {
    let builder = FmtSubscriber::builder()
        .with_max_level(config.level.to_tracing_level())
        .with_ansi(config.ansi_colors)
        .with_target(config.include_target)
        .compact();

    let result = if config.to_stderr {
        tracing::subscriber::set_global_default(
            builder.with_writer(std::io::stderr).finish(),
        )
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };

    match result {
        Ok(()) => Ok(()),
        // Already initialized: keep the existing subscriber.
        Err(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_parse() {
        assert_eq!(LogLevel::parse("debug"), LogLevel::Debug);
        assert_eq!(LogLevel::parse("INFO"), LogLevel::Info);
        assert_eq!(LogLevel::parse("Warning"), LogLevel::Warn);
        assert_eq!(LogLevel::parse("unknown"), LogLevel::Info);
    }

    #[test]
    fn test_worker_config_targets_stderr() {
        let config = LogConfig::worker();
        assert!(config.to_stderr);
        assert!(!config.ansi_colors);
    }
}
