//! Testbed error types.

use rfsynth_core::SyncError;
use rfsynth_sim::RadioError;
use std::path::PathBuf;

/// Result type for testbed operations
pub type TestbedResult<T> = Result<T, TestbedError>;

/// Failures that stop a capture run or a scheduling context.
///
/// Missing markers and guard-interval skips are outcomes, not errors; see
/// [`rfsynth_core::DetectionMiss`] and [`crate::scheduler::EventOutcome`].
#[derive(Debug, thiserror::Error)]
pub enum TestbedError {
    /// Malformed or out-of-range configuration, raised before any radio is touched
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An input file could not be read
    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An output file could not be written
    #[error("Cannot write {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid timeline {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Cannot start thread {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Thread {name} panicked: {message}")]
    Panicked { name: String, message: String },

    /// The ground-truth publisher could not be set up or send
    #[error("Broadcast error: {0}")]
    Broadcast(String),

    #[error("Radio fault: {0}")]
    Hardware(#[from] RadioError),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl TestbedError {
    pub fn config(msg: impl Into<String>) -> Self {
        TestbedError::Configuration(msg.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TestbedError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TestbedError::Persistence {
            path: path.into(),
            source,
        }
    }

    /// True for errors raised by configuration checks.
    pub fn is_configuration(&self) -> bool {
        matches!(self, TestbedError::Configuration(_))
    }
}
