use thiserror::Error;

/// Errors raised when a raw domain event cannot be normalized
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IngestError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

/// Errors raised by the persistence adapter
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Version conflict: expected {expected}, found {actual}")]
    VersionConflict { expected: u64, actual: u64 },

    #[error("Status conflict: expected {expected}, found {actual}")]
    StatusConflict { expected: String, actual: String },

    #[error("Storage backend failure: {0}")]
    Backend(String),
}

/// Errors raised by a single detector strategy
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectionError {
    #[error("Detector '{detector}' failed: {reason}")]
    Failed { detector: String, reason: String },

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

/// Errors that terminate a tenant's pipeline run
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Stage '{stage}' failed: {source}")]
    StageFailed {
        stage: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("Run cancelled during stage '{stage}'")]
    Cancelled { stage: &'static str },
}

impl PipelineError {
    /// Name of the stage the run stopped in
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::StageFailed { stage, .. } | PipelineError::Cancelled { stage } => stage,
        }
    }
}

/// Errors raised by reviewer actions on issues and anomalies
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LifecycleError {
    #[error("Unknown record: {0}")]
    NotFound(String),

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}
