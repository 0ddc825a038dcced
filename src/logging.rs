//! Structured logging setup.
//!
//! Thin wrapper over `tracing-subscriber` with environment variable
//! override (`RUST_LOG`), preset configurations, and a choice of
//! human-readable or JSON output.

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    registry::Registry,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Most detailed debugging information.
    Trace,
    /// Detailed debugging information, including per-attempt records.
    Debug,
    /// Notable lifecycle events such as breaker transitions.
    Info,
    /// Potential issues such as denied admissions and retried failures.
    Warn,
    /// Terminal failures.
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable multi-line output.
    Pretty,
    /// Single-line compact output.
    Compact,
    /// JSON output for production environments.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum level emitted when `RUST_LOG` is not set.
    pub level: LogLevel,
    /// Output format.
    pub format: LogFormat,
    /// Whether to show thread IDs.
    pub show_thread_ids: bool,
    /// Whether to show the target module.
    pub show_target: bool,
    /// Whether to emit span enter/close events.
    pub show_span_events: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Pretty,
            show_thread_ids: false,
            show_target: true,
            show_span_events: false,
        }
    }
}

impl LogConfig {
    /// Preset for development environments.
    pub fn development() -> Self {
        Self {
            level: LogLevel::Debug,
            format: LogFormat::Pretty,
            show_span_events: true,
            ..Default::default()
        }
    }

    /// Preset for production environments.
    pub fn production() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Json,
            show_thread_ids: true,
            ..Default::default()
        }
    }

    /// Preset for test environments.
    pub fn test() -> Self {
        Self {
            level: LogLevel::Warn,
            format: LogFormat::Compact,
            show_target: false,
            ..Default::default()
        }
    }
}

fn build_layer(config: &LogConfig) -> Box<dyn Layer<Registry> + Send + Sync> {
    let span_events = if config.show_span_events {
        FmtSpan::ENTER | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("steadyfetch={}", config.level)));

    let base = fmt::layer()
        .with_timer(fmt::time::time())
        .with_thread_ids(config.show_thread_ids)
        .with_target(config.show_target)
        .with_span_events(span_events);

    match config.format {
        LogFormat::Pretty => Box::new(base.pretty().with_filter(env_filter)),
        LogFormat::Compact => Box::new(base.compact().with_filter(env_filter)),
        LogFormat::Json => Box::new(base.json().with_filter(env_filter)),
    }
}

/// Initializes the logging system. Panics if a global subscriber is already
/// installed.
///
/// # Examples
///
/// ```no_run
/// use steadyfetch::logging::{init_logging, LogConfig};
///
/// init_logging(&LogConfig::development());
/// ```
pub fn init_logging(config: &LogConfig) {
    Registry::default().with(build_layer(config)).init();
}

/// Initializes the logging system, ignoring duplicate initialization.
///
/// Suitable for tests where multiple calls must not panic.
pub fn try_init_logging(config: &LogConfig) {
    let _ = Registry::default().with(build_layer(config)).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_conversion() {
        assert_eq!(Level::from(LogLevel::Trace), Level::TRACE);
        assert_eq!(Level::from(LogLevel::Debug), Level::DEBUG);
        assert_eq!(Level::from(LogLevel::Info), Level::INFO);
        assert_eq!(Level::from(LogLevel::Warn), Level::WARN);
        assert_eq!(Level::from(LogLevel::Error), Level::ERROR);
    }

    #[test]
    fn test_log_level_display() {
        assert_eq!(LogLevel::Debug.to_string(), "debug");
        assert_eq!(LogLevel::Error.to_string(), "error");
    }

    #[test]
    fn test_presets() {
        assert_eq!(LogConfig::default().format, LogFormat::Pretty);
        assert_eq!(LogConfig::development().level, LogLevel::Debug);
        assert_eq!(LogConfig::production().format, LogFormat::Json);
        assert!(LogConfig::production().show_thread_ids);
        assert_eq!(LogConfig::test().level, LogLevel::Warn);
    }

    #[test]
    fn test_try_init_is_idempotent() {
        try_init_logging(&LogConfig::test());
        try_init_logging(&LogConfig::test());
    }
}
