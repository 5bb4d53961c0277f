//! # Structured Logging
//!
//! Console output in one of three formats, plus an optional plain-text log
//! file so that long unattended runs leave a record behind.
//!
//! ## Example
//!
//! ```rust,ignore
//! use rfsynth_core::observe::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::default().with_file("logs/rfsynth.log"))?;
//! tracing::info!(pairs = 9, "Capture complete");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Log file used by the command-line tools unless overridden.
pub const DEFAULT_LOG_FILE: &str = "logs/rfsynth.log";

/// Minimum severity that reaches the outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let level = match s.to_ascii_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            other => return Err(format!("unknown log level '{}'", other)),
        };
        Ok(level)
    }
}

/// Console output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON lines
    Json,
    #[default]
    Pretty,
    /// One line per event
    Compact,
}

/// Where and how much a run logs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    /// Plain-text copy of the console output; parent directories are created
    pub file: Option<PathBuf>,
    /// Directive string that replaces `level`, e.g. "rfsynth_testbed=debug"
    pub filter: Option<String>,
    /// Tag console lines with the emitting thread (useful during replay)
    pub thread_names: bool,
}

impl LogConfig {
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Explicit directive, then `RUST_LOG`, then the configured level.
    fn env_filter(&self) -> EnvFilter {
        let fallback = || EnvFilter::new(self.level.as_str());
        match self.filter.as_deref() {
            Some(directives) => EnvFilter::try_new(directives).unwrap_or_else(|_| fallback()),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback()),
        }
    }

    fn console_layer(&self) -> Box<dyn Layer<Registry> + Send + Sync> {
        let layer = tracing_subscriber::fmt::layer().with_thread_names(self.thread_names);
        match self.format {
            LogFormat::Json => layer.json().boxed(),
            LogFormat::Pretty => layer.pretty().boxed(),
            LogFormat::Compact => layer.compact().boxed(),
        }
    }

    fn file_layer(&self) -> io::Result<Option<Box<dyn Layer<Registry> + Send + Sync>>> {
        let Some(path) = self.file.as_deref() else {
            return Ok(None);
        };
        let writer = Mutex::new(open_log_file(path)?);
        Ok(Some(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_thread_names(self.thread_names)
                .with_writer(writer)
                .boxed(),
        ))
    }
}

fn open_log_file(path: &Path) -> io::Result<File> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => fs::create_dir_all(dir)?,
        _ => {}
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Install the global logging subscriber.
///
/// Only opening the log file can fail. A second call, or a call after some
/// other subscriber was installed, leaves the existing one in place.
pub fn init_logging(config: &LogConfig) -> io::Result<()> {
    let mut layers = vec![config.console_layer()];
    layers.extend(config.file_layer()?);

    let _ = tracing_subscriber::registry()
        .with(layers)
        .with(config.env_filter())
        .try_init();
    Ok(())
}
