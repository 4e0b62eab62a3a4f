//! Error types for captiongraph.
//!
//! All errors are strongly typed using thiserror. Each pipeline stage has
//! its own enum; [`PipelineError`] wraps them so the batch runner can decide
//! whether a failure is fatal for the run or only for the current image.

use std::path::PathBuf;

use thiserror::Error;

use crate::storage::StorageError;

/// Errors raised while loading the caption dataset.
///
/// These are always fatal: no image is processed when the dataset
/// cannot be read.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Failed to read dataset {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed dataset {path}: {message}")]
    Malformed {
        path: PathBuf,
        message: String,
    },
}

/// Errors raised by a triple extractor.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Extractor request failed: {message}")]
    Request {
        message: String,
    },

    #[error("Extractor returned status {status}: {body}")]
    Status {
        status: u16,
        body: String,
    },

    #[error("Failed to decode extractor response: {message}")]
    Decode {
        message: String,
    },
}

/// Errors raised while reading or writing the progress checkpoint.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Checkpoint I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Checkpoint {path} is corrupt: {message}")]
    Corrupt {
        path: PathBuf,
        message: String,
    },
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {message}")]
    Parse {
        message: String,
    },

    #[error("Invalid config value for '{field}': {reason}")]
    Invalid {
        field: String,
        reason: String,
    },
}

/// Top-level error type for the caption pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Image {image_id} failed: {source}")]
    Image {
        image_id: i64,
        #[source]
        source: Box<PipelineError>,
    },
}

impl PipelineError {
    /// Wraps an error raised while processing a single image.
    #[must_use]
    pub fn image(image_id: i64, source: PipelineError) -> Self {
        Self::Image {
            image_id,
            source: Box::new(source),
        }
    }

    /// Returns true if this error must stop the whole run.
    ///
    /// Dataset, config and checkpoint failures leave no safe way to continue.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Dataset(_) | Self::Config(_) | Self::Checkpoint(_) => true,
            Self::Extraction(_) | Self::Storage(_) => false,
            Self::Image { source, .. } => source.is_fatal(),
        }
    }

    /// Returns true if this error only invalidates the image being processed.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !self.is_fatal()
    }

    /// The image that was being processed when the error occurred, if any.
    #[must_use]
    pub const fn image_id(&self) -> Option<i64> {
        match self {
            Self::Image { image_id, .. } => Some(*image_id),
            _ => None,
        }
    }
}

/// Result type alias for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;
