//! Error types for the scoring engine.
//!
//! Configuration problems are fatal and abort a run. Archive problems only
//! surface on the write path; unreadable history is skipped on read.

use std::path::PathBuf;
use thiserror::Error;

/// Invalid or incomplete OKR configuration.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("key result weights sum to {sum:.6}, expected 1.0")]
    WeightSum { sum: f64 },

    #[error("{scores} key result scores but {weights} weights")]
    WeightCount { scores: usize, weights: usize },

    #[error("key result '{kr_id}' is missing required field '{field}'")]
    MissingField { kr_id: String, field: &'static str },

    #[error("key result '{kr_id}' has weight {weight} outside 0.0..=1.0")]
    InvalidWeight { kr_id: String, weight: f64 },

    #[error("key result '{kr_id}' has {field} {value}, expected a finite non-negative number")]
    InvalidValue {
        kr_id: String,
        field: &'static str,
        value: f64,
    },

    #[error("trend setting '{setting}' is {value}, expected {expected}")]
    InvalidTrendSetting {
        setting: &'static str,
        value: f64,
        expected: &'static str,
    },

    #[error("key result '{kr_id}' is defined more than once")]
    DuplicateKr { kr_id: String },

    #[error("no key results defined")]
    NoKeyResults,

    #[error("key result '{kr_id}' references unknown capability '{capability}'")]
    UnknownCapability { kr_id: String, capability: String },

    #[error("capability '{capability}' has no rules")]
    EmptyCapability { capability: String },

    #[error("status thresholds invalid: caution_min {caution_min} must be <= on_track_min {on_track_min}")]
    InvalidThresholds { on_track_min: f64, caution_min: f64 },

    #[error("'{0}' is not a groupable dimension")]
    InvalidDimension(String),
}

/// Failure writing or enumerating the snapshot archive.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("archive I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to commit snapshot to {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}
