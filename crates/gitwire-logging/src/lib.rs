// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Centralized logging setup for gitwire
//!
//! Every binary logs to the console and, unless disabled, to a daily-rotated
//! file. `RUST_LOG` always wins over the configured level.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer, layer::SubscriberExt, registry::LookupSpan, util::SubscriberInitExt,
};

// Re-export clap for convenience when using CliLoggingArgs
pub use clap;

// Re-export Level for convenience
pub use tracing::Level;

/// Directory name used under the home directory when no log dir is given.
pub const DEFAULT_LOG_DIR_NAME: &str = ".gitwire-logs";

/// Keys whose values never reach the log output.
const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "token",
    "oauth2format",
    "authorization",
    "headers",
    "secretkey",
    "signingkey",
];

/// Output format for log messages
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable plaintext format
    #[default]
    Plaintext,
    /// Structured JSON format
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Plaintext => write!(f, "plaintext"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

/// CLI log level enum for clap integration
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CliLogLevel {
    /// Only error conditions
    Error,
    /// Errors and warnings
    Warn,
    /// Errors, warnings, and informational messages
    #[default]
    Info,
    /// All above plus debug information
    Debug,
    /// All above plus detailed tracing
    Trace,
}

impl From<CliLogLevel> for Level {
    fn from(level: CliLogLevel) -> Self {
        match level {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}

impl std::fmt::Display for CliLogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliLogLevel::Error => write!(f, "error"),
            CliLogLevel::Warn => write!(f, "warn"),
            CliLogLevel::Info => write!(f, "info"),
            CliLogLevel::Debug => write!(f, "debug"),
            CliLogLevel::Trace => write!(f, "trace"),
        }
    }
}

/// Standardized CLI logging arguments for clap integration
///
/// Use with `#[command(flatten)]`. Each flag can also be supplied through the
/// environment (`LOG_LEVEL`, `LOG_FORMAT`, `LOG_PATH`).
#[derive(Clone, Debug, Default, clap::Args, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CliLoggingArgs {
    /// Log verbosity level
    #[arg(long, value_enum, env = "LOG_LEVEL", help = "Log verbosity level (default: info)")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<CliLogLevel>,

    /// Log output format
    #[arg(long, value_enum, env = "LOG_FORMAT", help = "Log output format (default: plaintext)")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_format: Option<LogFormat>,

    /// Directory for rotated log files
    #[arg(long, env = "LOG_PATH", help = "Directory for log files (default: ~/.gitwire-logs)")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,

    /// Only log to the console
    #[arg(long, help = "Disable the rotated log file")]
    #[serde(default)]
    pub no_log_file: bool,
}

impl CliLoggingArgs {
    /// Initialize logging from the parsed CLI arguments.
    ///
    /// The returned guard flushes the file writer on drop; keep it alive for
    /// the lifetime of the process.
    pub fn init(&self, component: &str) -> anyhow::Result<LoggingGuard> {
        let level: Level = self.log_level.unwrap_or_default().into();
        let format = self.log_format.unwrap_or_default();

        if self.no_log_file {
            init(component, level, format)?;
            return Ok(LoggingGuard::console_only());
        }

        let dir = self.resolve_log_dir();
        init_with_file(component, level, format, &dir)
    }

    /// Resolve the log directory, falling back to `~/.gitwire-logs`
    pub fn resolve_log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(default_log_dir)
    }
}

/// Keeps the non-blocking file writer alive.
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard {
    log_dir: Option<PathBuf>,
    _worker: Option<WorkerGuard>,
}

impl LoggingGuard {
    fn console_only() -> Self {
        Self {
            log_dir: None,
            _worker: None,
        }
    }

    /// Directory receiving the rotated log files, when file logging is on.
    pub fn log_dir(&self) -> Option<&Path> {
        self.log_dir.as_deref()
    }
}

/// Default directory for rotated log files: `~/.gitwire-logs`
pub fn default_log_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(DEFAULT_LOG_DIR_NAME)
}

/// File name prefix of the rotated files; the appender adds `.YYYY-MM-DD`.
pub fn log_file_prefix(component: &str) -> String {
    format!("{component}.log")
}

/// Initialize console logging with the specified component name, default level, and format
pub fn init(component: &str, default_level: Level, format: LogFormat) -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(env_filter(component, default_level))
        .with(fmt_layer(format, io::stdout, true))
        .try_init()?;
    Ok(())
}

/// Initialize console logging plus a daily-rotated file in `log_dir`
pub fn init_with_file(
    component: &str,
    default_level: Level,
    format: LogFormat,
    log_dir: &Path,
) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(log_dir)?;

    let appender = tracing_appender::rolling::daily(log_dir, log_file_prefix(component));
    let (writer, worker) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(env_filter(component, default_level))
        .with(fmt_layer(format, io::stdout, true))
        .with(fmt_layer(format, writer, false))
        .try_init()?;
    tracing::debug!(log_dir = %log_dir.display(), %format, "File logging enabled");

    Ok(LoggingGuard {
        log_dir: Some(log_dir.to_path_buf()),
        _worker: Some(worker),
    })
}

fn env_filter(component: &str, default_level: Level) -> EnvFilter {
    let target = component.replace('-', "_");
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},{}={}", default_level, target, default_level))
    })
}

fn fmt_layer<S, W>(format: LogFormat, writer: W, ansi: bool) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'span> LookupSpan<'span>,
    W: for<'writer> tracing_subscriber::fmt::MakeWriter<'writer> + Send + Sync + 'static,
{
    match format {
        LogFormat::Json => {
            let layer = tracing_subscriber::fmt::layer().with_writer(writer).json();
            #[cfg(debug_assertions)]
            let layer = layer.with_file(true).with_line_number(true);
            Box::new(layer)
        }
        LogFormat::Plaintext => {
            let layer = tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(ansi);
            #[cfg(debug_assertions)]
            let layer = layer.with_file(true).with_line_number(true);
            Box::new(layer)
        }
    }
}

/// Redact sensitive information from log output
pub fn redact(_value: impl std::fmt::Display) -> &'static str {
    "[REDACTED]"
}

/// Copy of a JSON payload with credential-bearing fields replaced, for logging.
pub fn redact_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, inner)| {
                    if SENSITIVE_KEYS.contains(&key.to_ascii_lowercase().as_str()) {
                        (key.clone(), Value::String(redact(key).to_string()))
                    } else {
                        (key.clone(), redact_json(inner))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_json).collect()),
        other => other.clone(),
    }
}
