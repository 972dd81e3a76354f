//! Error types shared by every pipeline stage.

use std::io;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use thiserror::Error;

/// Errors raised by the post-processing stages.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A required upstream artifact is absent. Stages abort without output.
    #[error("Missing input: {0}")]
    MissingInput(String),

    /// Merge inputs disagree on reach sets, axes or shapes.
    #[error("Structural mismatch: {0}")]
    StructuralMismatch(String),

    /// A file in a pipeline directory does not follow the naming convention.
    #[error("Unexpected file name {name:?}: {reason}")]
    BadFileName { name: String, reason: String },

    /// An identifier (VPU code, member number, cycle date) failed validation.
    #[error("Invalid {kind} {value:?}: {reason}")]
    InvalidId {
        kind: &'static str,
        value: String,
        reason: String,
    },

    #[error("VPU {0} has no rank in the priority list")]
    UnrankedVpu(String),

    #[error("Failed to start worker pool: {0}")]
    WorkerPool(String),

    /// The routing executable could not start or exited non-zero.
    #[error("Routing {namelist} failed: {reason}")]
    Routing { namelist: PathBuf, reason: String },

    #[error("Timestep {0} is not present in the series")]
    MissingTimestep(NaiveDateTime),

    /// Malformed or unsupported netCDF content.
    #[error("netCDF error in {path}: {reason}")]
    NetCdf { path: PathBuf, reason: String },

    /// Malformed consolidated store content.
    #[error("Store error in {path}: {reason}")]
    Store { path: PathBuf, reason: String },

    #[error("I/O error at {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error(transparent)]
    Arrow(#[from] arrow::error::ArrowError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// Builds a closure mapping an `io::Error` to `PipelineError::Io` for `path`.
    pub fn io(path: &Path) -> impl FnOnce(io::Error) -> PipelineError + '_ {
        move |source| PipelineError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn netcdf(path: &Path, reason: impl Into<String>) -> Self {
        Self::NetCdf {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn store(path: &Path, reason: impl Into<String>) -> Self {
        Self::Store {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Whether this error means an upstream stage never produced its output.
    pub fn is_missing_input(&self) -> bool {
        matches!(self, Self::MissingInput(_))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
