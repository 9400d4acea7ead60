//! Structured logging.
//!
//! The process-wide subscriber writes human-readable `key=value` records to
//! standard output. Components receive a [`Logger`], which is a span they
//! narrow with [`Logger::with_component`] so every record they emit carries
//! a `component` field.

use tracing::{Level, Span};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::container::{Config, Flag, Module};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config for LogConfig {
    fn flags(&self) -> Vec<Flag> {
        vec![Flag::string(
            "log-level",
            &self.level,
            "Log level (debug, info, warn, error)",
        )]
    }

    fn set_flag(&mut self, name: &str, value: &str) -> Result<(), String> {
        match name {
            "log-level" => {
                self.level = value.to_string();
                Ok(())
            }
            other => Err(format!("unknown flag {other}")),
        }
    }
}

/// Map a level name to a tracing level. Unknown names fall back to info.
pub fn parse_level(name: &str) -> Level {
    match name {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Injectable logging capability.
#[derive(Debug, Clone)]
pub struct Logger {
    span: Span,
}

impl Logger {
    /// Install the global subscriber for `config` and return the root
    /// logger. `RUST_LOG`, when set, takes precedence over the level flag.
    /// Installing twice is harmless; the first subscriber wins.
    pub fn init(config: &LogConfig) -> Self {
        let level = parse_level(&config.level);
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
        let installed = tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stdout)
                    .with_target(false),
            )
            .try_init();
        if installed.is_err() {
            tracing::debug!("log subscriber already installed");
        }
        Self::root()
    }

    /// Logger without component annotation. Does not touch the global
    /// subscriber.
    pub fn root() -> Self {
        Self { span: Span::none() }
    }

    /// Child logger whose records carry `component = name`. The span sits
    /// at error level so it survives any level filter its records pass.
    pub fn with_component(&self, name: &'static str) -> Self {
        Self {
            span: tracing::error_span!(parent: &self.span, "component", component = name),
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Run `f` with this logger's annotations in effect.
    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        self.span.in_scope(f)
    }
}

/// Exposes `--log-level`; the root logger itself is built by the
/// entrypoint from this record and handed to the container.
pub fn module() -> Module {
    Module::new("logger", "Structured Logger").config(LogConfig::default())
}
