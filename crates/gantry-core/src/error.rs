//! Error types for Gantry

use std::path::PathBuf;
use thiserror::Error;

use crate::types::TargetTriple;

/// Result type alias using GantryError
pub type Result<T> = std::result::Result<T, GantryError>;

/// Main error type for Gantry operations
#[derive(Debug, Error)]
pub enum GantryError {
    /// Configuration-related errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Target matrix errors
    #[error(transparent)]
    Matrix(#[from] MatrixError),

    /// Package manifest errors
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// Artifact collection errors
    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    /// Publish pipeline errors
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {message}")]
    InvalidValue { field: String, message: String },

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// IO error
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
}

/// Target matrix errors
#[derive(Debug, Error)]
pub enum MatrixError {
    /// Triple does not have the cpu-vendor-os[-abi] shape
    #[error("Invalid target triple '{0}'")]
    InvalidTriple(String),

    /// Same triple declared twice
    #[error("Duplicate target triple '{0}' in matrix")]
    DuplicateTarget(TargetTriple),

    /// Target declares no build steps
    #[error("Target '{0}' has no build steps")]
    EmptyBuild(TargetTriple),

    /// Matrix has no targets
    #[error("Target matrix is empty")]
    Empty,

    /// Triple is not part of the matrix
    #[error("Target '{0}' is not in the matrix")]
    UnknownTarget(String),
}

/// Package manifest errors
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Package manifest not found
    #[error("Package manifest not found at {0}")]
    NotFound(PathBuf),

    /// Failed to parse manifest
    #[error("Failed to parse manifest: {0}")]
    ParseError(String),

    /// Failed to write manifest
    #[error("Failed to write manifest: {0}")]
    WriteError(String),

    /// Manifest is missing something a publish requires
    #[error("Invalid manifest: {0}")]
    Invalid(String),
}

/// Artifact collection errors
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// A second artifact arrived for the same target
    #[error("Duplicate artifact for target '{0}'")]
    Duplicate(TargetTriple),

    /// Artifact deposited for a target outside the matrix
    #[error("Artifact for unknown target '{0}'")]
    UnknownTarget(TargetTriple),

    /// Artifact file could not be read
    #[error("Artifact for '{triple}' unreadable at {path}: {reason}")]
    Unreadable {
        triple: TargetTriple,
        path: PathBuf,
        reason: String,
    },

    /// Fewer artifacts than targets at collection time
    #[error("Aggregation incomplete: missing artifacts for {}", format_triples(.missing))]
    Incomplete { missing: Vec<TargetTriple> },

    /// Artifact transport failure
    #[error("Artifact transport error: {0}")]
    Transport(String),

    /// Store lock poisoned by a panicking depositor
    #[error("Artifact store lock poisoned")]
    Poisoned,
}

/// Publish pipeline errors raised before anything reaches the registry
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Artifact set does not cover the matrix
    #[error("Artifact set does not match the target matrix: missing [{}], unexpected [{}]", format_triples(.missing), format_triples(.unexpected))]
    AggregationIncomplete {
        missing: Vec<TargetTriple>,
        unexpected: Vec<TargetTriple>,
    },

    /// Manifest cannot be published
    #[error("Manifest invalid: {0}")]
    ManifestInvalid(String),

    /// An artifact in the set could not be read
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

fn format_triples(triples: &[TargetTriple]) -> String {
    triples
        .iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl GantryError {
    /// Create a new "other" error with a message
    pub fn other<S: Into<String>>(msg: S) -> Self {
        Self::Other(msg.into())
    }
}
