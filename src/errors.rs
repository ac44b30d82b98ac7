//! Typed error hierarchy for synctick.
//!
//! Four enums cover the layers of a tick:
//! - `RecordError`: the `key: value` text format shared by every persisted file
//! - `ConfigError`: configuration values, reported before any state is touched
//! - `StateError`: lock and failure records, including corruption
//! - `TickError`: everything a single tick can fail with

use std::path::PathBuf;
use thiserror::Error;

/// Errors from parsing `key: value` records.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("line {line}: expected `key: value`, found {content:?}")]
    Malformed { line: usize, content: String },

    #[error("line {line}: duplicate key `{key}`")]
    DuplicateKey { line: usize, key: String },
}

/// Errors from loading and validating the sync configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: RecordError,
    },

    #[error("Unknown field `{0}`")]
    UnknownField(String),

    #[error("Missing or blank required field `{field}`")]
    MissingField { field: &'static str },

    #[error("Conflicting settings: {0}")]
    Conflict(String),

    #[error("Invalid value for `{field}`: {value:?}")]
    InvalidValue { field: &'static str, value: String },

    #[error("Cannot read file referenced by `{field}` ({path}): {source}")]
    UnreadableReference {
        field: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Local directory {0} does not exist or is not a directory")]
    BadLocalDir(PathBuf),
}

/// Errors from the persisted lock and failure records.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Corrupt failure record at {path}: {detail}")]
    CorruptState { path: PathBuf, detail: String },

    #[error("Bad lock file at {path}: {detail} (remove it manually if no sync is running)")]
    BadLockFile { path: PathBuf, detail: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StateError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors that abort a tick.
#[derive(Debug, Error)]
pub enum TickError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
