//! Error types for the data model

use thiserror::Error;

/// Errors raised by data that is structurally valid Rust but not usable
/// neuroimaging input.
///
/// These are branch-fatal: the stage that observes one fails, and only the
/// consumers that depend on it are blocked.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataError {
    #[error("expected a {expected}-D volume, got {found}-D")]
    Dimensionality { expected: &'static str, found: usize },

    #[error("geometry mismatch: {0}")]
    GeometryMismatch(String),

    #[error("mask is empty: {0}")]
    EmptyMask(String),

    #[error("label identity lost: voxel value {0} is not an integer label")]
    LabelIdentityLost(f32),

    #[error("label identity lost: label {0} is not part of the atlas")]
    UnknownLabel(i32),

    #[error("expected at least 3 tissue probability maps, got {0}")]
    TooFewTissueMaps(usize),

    #[error("transform '{0}' is not invertible")]
    SingularTransform(String),

    #[error("zero variance in {0}")]
    ZeroVariance(String),

    #[error("frame {index} out of range for a series of {frames} frames")]
    FrameOutOfRange { index: usize, frames: usize },

    #[error("ASL context lists {context} volumes but the series has {frames}")]
    ContextLength { context: usize, frames: usize },

    #[error("unknown ASL volume type: {0}")]
    UnknownVolumeType(String),

    #[error("no usable {0} volumes in the series")]
    NoVolumes(&'static str),
}

/// Errors raised while validating acquisition metadata.
///
/// All of these are construction-time errors: a workflow is never built from
/// metadata that fails validation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetadataError {
    #[error("required metadata field '{0}' is missing")]
    MissingField(&'static str),

    #[error("unrecognized labeling type '{0}': expected a CASL or PASL variant")]
    UnrecognizedLabelingType(String),

    #[error("metadata field '{field}' has invalid value {value}")]
    InvalidField { field: &'static str, value: f64 },

    #[error("metadata is not valid JSON: {0}")]
    Json(String),
}

impl From<serde_json::Error> for MetadataError {
    fn from(err: serde_json::Error) -> Self {
        MetadataError::Json(err.to_string())
    }
}
