//! Per-target build outcomes

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use gantry_core::TargetTriple;
use serde::Serialize;
use thiserror::Error;

/// Stage of a target's command sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildPhase {
    /// Toolchain provisioning
    Setup,
    /// Compilation
    Build,
    /// Stripping and other post-processing
    PostProcess,
}

impl fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Setup => write!(f, "setup"),
            Self::Build => write!(f, "build"),
            Self::PostProcess => write!(f, "post-process"),
        }
    }
}

/// How a step process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ExitStatus {
    /// Exited with a code
    Code(i32),
    /// Killed by a signal
    Signal(i32),
    /// Neither was reported
    Unknown,
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "exit code {}", code),
            Self::Signal(signal) => write!(f, "signal {}", signal),
            Self::Unknown => write!(f, "unknown status"),
        }
    }
}

/// Why a target produced no artifact
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BuildFailure {
    /// A step ran and exited unsuccessfully
    #[error("{phase} step `{step}` failed with {status}")]
    StepFailed {
        phase: BuildPhase,
        step: String,
        status: ExitStatus,
        stderr_tail: String,
    },

    /// A step could not be started
    #[error("{phase} step `{step}` could not start: {reason}")]
    SpawnFailed {
        phase: BuildPhase,
        step: String,
        reason: String,
    },

    /// The target ran past its timeout
    #[error("timed out after {}s", .after.as_secs())]
    TimedOut { after: Duration },

    /// Cancel was requested while the target was running
    #[error("cancelled")]
    Cancelled,

    /// Every step succeeded but the artifact file is not there
    #[error("artifact missing at {}", .path.display())]
    ArtifactMissing { path: PathBuf },

    /// The artifact could not be deposited into the store
    #[error("artifact rejected by store: {reason}")]
    Deposit { reason: String },

    /// The build task panicked
    #[error("build task panicked: {reason}")]
    Panicked { reason: String },
}

impl BuildFailure {
    /// Taxonomy name of the failure
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StepFailed { phase, .. } | Self::SpawnFailed { phase, .. } => match phase {
                BuildPhase::Setup => "provisioning_failure",
                BuildPhase::Build => "build_failure",
                BuildPhase::PostProcess => "post_process_failure",
            },
            Self::TimedOut { .. } => "timed_out",
            Self::Cancelled => "cancelled",
            Self::ArtifactMissing { .. } => "artifact_missing",
            Self::Deposit { .. } => "deposit_failed",
            Self::Panicked { .. } => "panicked",
        }
    }

    /// Whether another attempt could succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Cancelled | Self::Deposit { .. })
    }
}

/// Terminal state of one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BuildOutcome {
    /// Artifact written to `artifact`
    Success { artifact: PathBuf },
    /// No artifact
    Failure { cause: BuildFailure },
}

/// Result of building one target
#[derive(Debug, Clone, Serialize)]
pub struct BuildResult {
    /// Target that was built
    pub triple: TargetTriple,
    /// What happened
    pub outcome: BuildOutcome,
    /// Wall time of the final attempt
    pub duration: Duration,
    /// Number of attempts made
    pub attempts: u32,
}

impl BuildResult {
    /// Successful result
    pub fn success(triple: TargetTriple, artifact: PathBuf, duration: Duration) -> Self {
        Self {
            triple,
            outcome: BuildOutcome::Success { artifact },
            duration,
            attempts: 1,
        }
    }

    /// Failed result
    pub fn failure(triple: TargetTriple, cause: BuildFailure, duration: Duration) -> Self {
        Self {
            triple,
            outcome: BuildOutcome::Failure { cause },
            duration,
            attempts: 1,
        }
    }

    /// Check if the target produced an artifact
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, BuildOutcome::Success { .. })
    }

    /// Artifact path on success
    pub fn artifact(&self) -> Option<&PathBuf> {
        match &self.outcome {
            BuildOutcome::Success { artifact } => Some(artifact),
            BuildOutcome::Failure { .. } => None,
        }
    }

    /// Failure cause on failure
    pub fn failure_cause(&self) -> Option<&BuildFailure> {
        match &self.outcome {
            BuildOutcome::Success { .. } => None,
            BuildOutcome::Failure { cause } => Some(cause),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kinds() {
        let failure = BuildFailure::StepFailed {
            phase: BuildPhase::Setup,
            step: "rustup target add x".to_string(),
            status: ExitStatus::Code(1),
            stderr_tail: String::new(),
        };
        assert_eq!(failure.kind(), "provisioning_failure");
        assert_eq!(
            failure.to_string(),
            "setup step `rustup target add x` failed with exit code 1"
        );

        assert_eq!(BuildFailure::Cancelled.kind(), "cancelled");
        assert!(!BuildFailure::Cancelled.is_retryable());
        assert!(BuildFailure::TimedOut {
            after: Duration::from_secs(3)
        }
        .is_retryable());
    }

    #[test]
    fn test_result_accessors() {
        let triple = TargetTriple::parse("x86_64-apple-darwin").unwrap();
        let ok = BuildResult::success(triple.clone(), PathBuf::from("a.node"), Duration::ZERO);
        assert!(ok.is_success());
        assert!(ok.failure_cause().is_none());

        let failed = BuildResult::failure(triple, BuildFailure::Cancelled, Duration::ZERO);
        assert!(!failed.is_success());
        assert!(failed.artifact().is_none());
    }
}
