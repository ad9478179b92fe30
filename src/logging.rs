//! Diagnostic logging setup.
//!
//! Library code only emits `tracing` events; installing a subscriber is left
//! to the binary (or to an embedding application). Output goes to stderr so
//! that response bodies printed on stdout stay machine-readable.

use tracing_subscriber::{fmt, EnvFilter};

/// How chatty the subscriber should be.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    /// Retries and failures only (default)
    #[default]
    Warn,
    Error,
    Off,
}

impl LogLevel {
    /// Directive understood by [`EnvFilter`].
    pub fn directive(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Off => "off",
        }
    }
}

impl From<u8> for LogLevel {
    /// Maps a `-v` count: 0 = warn, 1 = info, 2 = debug, 3+ = trace.
    fn from(verbosity: u8) -> Self {
        match verbosity {
            0 => LogLevel::Warn,
            1 => LogLevel::Info,
            2 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }
}

/// Subscriber settings.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub with_timestamps: bool,
    /// Include the module path of each event
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            with_timestamps: true,
            with_target: true,
        }
    }
}

impl LoggingConfig {
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_timestamps(mut self, enabled: bool) -> Self {
        self.with_timestamps = enabled;
        self
    }

    pub fn with_target(mut self, enabled: bool) -> Self {
        self.with_target = enabled;
        self
    }

    pub fn from_verbosity(verbosity: u8) -> Self {
        Self::default().with_level(LogLevel::from(verbosity))
    }

    /// The filter to install. `RUST_LOG` wins over the configured level.
    fn env_filter(&self) -> EnvFilter {
        match std::env::var("RUST_LOG") {
            Ok(directives) if !directives.trim().is_empty() => EnvFilter::new(directives),
            _ => EnvFilter::new(self.level.directive()),
        }
    }
}

/// Installs a stderr subscriber as the global default.
///
/// Returns `false` if a global subscriber was already installed, in which
/// case the existing one is left in place.
///
/// ```no_run
/// use spcall::logging::{init_logging, LogLevel, LoggingConfig};
///
/// init_logging(LoggingConfig::default().with_level(LogLevel::Debug));
/// ```
pub fn init_logging(config: LoggingConfig) -> bool {
    let builder = fmt::Subscriber::builder()
        .with_env_filter(config.env_filter())
        .with_writer(std::io::stderr)
        .with_target(config.with_target);

    if config.with_timestamps {
        builder.try_init().is_ok()
    } else {
        builder.without_time().try_init().is_ok()
    }
}
