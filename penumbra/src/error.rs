//! Error types for model estimation and correction.

use common::serde::SerdeFormatError;
use thiserror::Error;

use crate::stack::ImageSize;

/// Errors surfaced before optimization starts, or while moving models in and out of files.
///
/// Optimizer non-convergence is not an error; it is reported in [`crate::FitDiagnostics`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("Image stack is empty")]
    EmptyStack,

    #[error("Dimension mismatch for plane {index}: expected {expected}, got {actual}")]
    DimensionMismatch {
        index: usize,
        expected: ImageSize,
        actual: ImageSize,
    },

    #[error("Plane size {0} has no pixels")]
    EmptyPlane(ImageSize),

    #[error("Plane {index} has no finite pixels")]
    NoFinitePixels { index: usize },

    #[error("Plane size {actual} does not match model size {expected}")]
    PlaneSizeMismatch {
        expected: ImageSize,
        actual: ImageSize,
    },

    #[error("Invalid zero-light limits: max {max} is below min {min}")]
    InvalidZLimits { min: f64, max: f64 },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to load plane {index}: {message}")]
    PlaneSource { index: usize, message: String },

    #[error("Invalid model descriptor: {0}")]
    InvalidModel(String),

    #[error("Model or configuration file error: {0}")]
    Persistence(#[from] SerdeFormatError),
}

pub type Result<T> = std::result::Result<T, Error>;
