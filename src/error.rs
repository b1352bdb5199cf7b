//! Error types and result aliases.
//!
//! Only conditions that must stop a run live here. Degraded translation
//! outcomes (missing mappings, malformed result lines, empty results,
//! unresolved locations) are logged and reported, never raised.

use std::path::PathBuf;

pub type DynError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("csv error in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// An origin time in the pick table could not be parsed.
    #[error("invalid origin time '{value}' for event {event_id}")]
    InvalidTimestamp { event_id: String, value: String },

    /// A run-file entry held a value of the wrong shape.
    #[error("invalid value for '{key}' in {path}: '{value}'")]
    InvalidSetting {
        path: PathBuf,
        key: String,
        value: String,
    },

    #[error("missing required setting: {0}")]
    MissingSetting(&'static str),

    #[error("failed to launch {program}: {source}")]
    EngineLaunch {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The external relocation program exited unsuccessfully.
    #[error("{program} exited with {status}: {stderr}")]
    EngineFailed {
        program: PathBuf,
        status: std::process::ExitStatus,
        stderr: String,
    },
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        Self::Csv {
            path: path.into(),
            source,
        }
    }
}
