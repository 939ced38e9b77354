//! Exit codes for the CLI

#![allow(dead_code)]

use std::fmt;

use gantry_core::error::{ArtifactError, ManifestError, PipelineError};
use gantry_core::GantryError;

/// Success
pub const SUCCESS: i32 = 0;

/// General error
pub const ERROR: i32 = 1;

/// Configuration error
pub const CONFIG_ERROR: i32 = 2;

/// Validation error
pub const VALIDATION_ERROR: i32 = 5;

/// One or more targets failed to build
pub const BUILD_FAILED: i32 = 6;

/// Artifacts missing for some targets
pub const AGGREGATION_INCOMPLETE: i32 = 7;

/// Registry refused or could not be reached
pub const PUBLISH_FAILED: i32 = 8;

/// User cancelled
pub const CANCELLED: i32 = 130;

/// A command outcome that maps to a specific exit code. An empty message
/// means the command already reported the failure.
#[derive(Debug)]
pub struct Failure {
    pub code: i32,
    pub message: String,
}

impl Failure {
    /// Failure the command has already printed
    pub fn silent(code: i32) -> Self {
        Self {
            code,
            message: String::new(),
        }
    }

    /// Failure with a message for `main` to print
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for Failure {}

/// Exit code for an error returned by a command
pub fn for_error(err: &anyhow::Error) -> i32 {
    if let Some(failure) = err.downcast_ref::<Failure>() {
        return failure.code;
    }

    if let Some(pipeline) = err.downcast_ref::<PipelineError>() {
        return pipeline_code(pipeline);
    }

    if let Some(artifact) = err.downcast_ref::<ArtifactError>() {
        return artifact_code(artifact);
    }

    if err.downcast_ref::<ManifestError>().is_some() {
        return VALIDATION_ERROR;
    }

    match err.downcast_ref::<GantryError>() {
        Some(GantryError::Config(_)) => CONFIG_ERROR,
        Some(GantryError::Matrix(_)) => CONFIG_ERROR,
        Some(GantryError::Manifest(_)) => VALIDATION_ERROR,
        Some(GantryError::Artifact(e)) => artifact_code(e),
        Some(GantryError::Pipeline(e)) => pipeline_code(e),
        _ => ERROR,
    }
}

fn pipeline_code(err: &PipelineError) -> i32 {
    match err {
        PipelineError::AggregationIncomplete { .. } => AGGREGATION_INCOMPLETE,
        PipelineError::ManifestInvalid(_) => VALIDATION_ERROR,
        PipelineError::Artifact(e) => artifact_code(e),
    }
}

fn artifact_code(err: &ArtifactError) -> i32 {
    match err {
        ArtifactError::Incomplete { .. } => AGGREGATION_INCOMPLETE,
        _ => ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::error::ConfigError;
    use gantry_core::TargetTriple;

    #[test]
    fn test_failure_code() {
        let err = anyhow::Error::new(Failure::silent(BUILD_FAILED));
        assert_eq!(for_error(&err), BUILD_FAILED);
    }

    #[test]
    fn test_config_error_code() {
        let err: anyhow::Error = GantryError::from(ConfigError::InvalidValue {
            field: "build.concurrency".to_string(),
            message: "must be at least 1".to_string(),
        })
        .into();
        assert_eq!(for_error(&err), CONFIG_ERROR);
    }

    #[test]
    fn test_incomplete_code() {
        let err: anyhow::Error = ArtifactError::Incomplete {
            missing: vec![TargetTriple::parse("aarch64-apple-darwin").unwrap()],
        }
        .into();
        assert_eq!(for_error(&err), AGGREGATION_INCOMPLETE);

        let err: anyhow::Error = PipelineError::AggregationIncomplete {
            missing: vec![],
            unexpected: vec![],
        }
        .into();
        assert_eq!(for_error(&err), AGGREGATION_INCOMPLETE);
    }

    #[test]
    fn test_manifest_error_code() {
        let err: anyhow::Error = ManifestError::Invalid("missing version".to_string()).into();
        assert_eq!(for_error(&err), VALIDATION_ERROR);
    }

    #[test]
    fn test_other_errors() {
        let err = anyhow::anyhow!("boom");
        assert_eq!(for_error(&err), ERROR);
        assert_eq!(SUCCESS, 0);
    }
}
