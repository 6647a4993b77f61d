//! Error types for the pipeline system

use asl_types::{DataError, MetadataError};
use thiserror::Error;

use crate::data::PortType;

/// Construction-time errors. A graph that produces one of these never runs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("port type mismatch on {edge}: consumer expects {expected}, edge delivers {found}")]
    PortType {
        edge: String,
        expected: PortType,
        found: PortType,
    },

    #[error("input port '{node}.{port}' already has a producer ({existing})")]
    MultipleProducers {
        node: String,
        port: String,
        existing: String,
    },

    #[error("connecting '{from}' to '{to}' would create a cycle")]
    Cycle { from: String, to: String },

    #[error("required input port '{node}.{port}' has no connection")]
    UnresolvedRequiredPort { node: String, port: String },

    #[error("node not found: {0}")]
    UnknownNode(String),

    #[error("node '{node}' has no {direction} port '{port}'")]
    UnknownPort {
        node: String,
        port: String,
        direction: &'static str,
    },

    #[error("duplicate node name: {0}")]
    DuplicateNode(String),

    #[error("external input '{0}' is required but was not supplied")]
    MissingExternalInput(String),

    #[error("external input '{port}' expects {expected}, got {found}")]
    ExternalInputType {
        port: String,
        expected: PortType,
        found: PortType,
    },

    #[error("invalid metadata: {0}")]
    Metadata(#[from] MetadataError),

    #[error("invalid stage configuration: {0}")]
    InvalidConfiguration(String),
}

/// Errors raised while a single stage runs. Fatal to that stage's branch
/// only.
#[derive(Error, Debug)]
pub enum StageError {
    #[error("missing input '{0}'")]
    MissingInput(String),

    #[error("port '{port}' carries {found}, expected {expected}")]
    WrongType {
        port: String,
        expected: PortType,
        found: PortType,
    },

    #[error(transparent)]
    Data(#[from] DataError),

    #[error("selector '{selector}' failed: {message}")]
    Selector { selector: String, message: String },

    #[error("publishing derivative failed: {0}")]
    Sink(String),

    #[error("external tool failed: {0}")]
    External(#[from] anyhow::Error),

    #[error("stage panicked: {0}")]
    Panicked(String),

    #[error("invalid configuration: {0}")]
    BadConfig(String),
}

/// Umbrella error for callers driving a whole run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("stage '{stage_name}' failed: {source}")]
    Stage {
        stage_name: String,
        #[source]
        source: StageError,
    },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Generic error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;
