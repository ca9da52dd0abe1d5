//! Error types for the thermal_vision library

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type alias for thermal_vision operations
pub type Result<T> = std::result::Result<T, InspectionError>;

/// Everything that can stop a single image's inspection run.
///
/// Every variant is scoped to one item. Batch callers catch it per image and keep going.
#[derive(Error, Debug)]
pub enum InspectionError {
    /// Image file could not be read or decoded
    #[error("Failed to load image {path}")]
    ImageLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Image could not be encoded or written
    #[error("Failed to save image {path}")]
    ImageSave {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Plain filesystem failure (directory creation, record write, font read)
    #[error("I/O error on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Output record could not be parsed or serialized
    #[error("Invalid inspection record {path}")]
    Record {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Anomaly map shape and data disagree, or the map is not at least 2-D
    #[error("Invalid anomaly map: {reason}")]
    InvalidAnomalyMap { reason: String },

    /// The upstream anomaly model failed outright (as opposed to returning no map)
    #[error("Anomaly model error: {message}")]
    Model {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Label font could not be parsed
    #[error("Invalid font {path}: {reason}")]
    Font { path: PathBuf, reason: String },

    /// A record references an original image that no longer exists
    #[error("Original image not found: {path}")]
    MissingImage { path: PathBuf },

    /// A batch worker panicked or was cancelled
    #[error("Worker failure: {message}")]
    Worker { message: String },
}

impl InspectionError {
    pub fn image_load(path: impl Into<PathBuf>, source: image::ImageError) -> Self {
        Self::ImageLoad {
            path: path.into(),
            source,
        }
    }

    pub fn image_save(path: impl Into<PathBuf>, source: image::ImageError) -> Self {
        Self::ImageSave {
            path: path.into(),
            source,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a model error with context
    pub fn model<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Model {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// The offending file, when the failure is tied to one.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::ImageLoad { path, .. }
            | Self::ImageSave { path, .. }
            | Self::Io { path, .. }
            | Self::Record { path, .. }
            | Self::Font { path, .. }
            | Self::MissingImage { path } => Some(path),
            Self::InvalidAnomalyMap { .. } | Self::Model { .. } | Self::Worker { .. } => None,
        }
    }

    /// Input errors are terminal for the item. Everything else can be retried or
    /// handled by falling back.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::ImageLoad { .. } | Self::MissingImage { .. } | Self::Record { .. }
        )
    }
}

/// Why a feedback file was rejected.
///
/// Never stops a run. The adjuster falls back to a neutral adjustment and keeps the
/// message in the record's audit.
#[derive(Error, Debug)]
pub enum FeedbackError {
    #[error("failed to read feedback file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("feedback file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("feedback JSON root must be an object")]
    NotAnObject,

    /// A numeric field held a string that does not parse, or a non-scalar value
    #[error("could not convert {field} value {value} to a number")]
    NotANumber { field: String, value: String },

    #[error("{field} value {value} does not fit in f64")]
    OutOfRange { field: String, value: String },
}
