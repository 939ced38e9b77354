//! Gantry Core - Core library for cross-platform addon releases
//!
//! This crate provides the target matrix, artifact collection, package
//! manifest handling, configuration and the publish workflow used by the
//! Gantry build-and-release orchestrator.

pub mod artifacts;
pub mod config;
pub mod error;
pub mod manifest;
pub mod matrix;
pub mod transport;
pub mod types;
pub mod workflow;

pub use artifacts::{Artifact, ArtifactSet, ArtifactStore, PartialCollection};
pub use error::{GantryError, Result};
pub use manifest::{PackageManifest, SecondaryIdentity};
pub use matrix::{EnvironmentSpec, TargetDescriptor, TargetMatrix};
pub use transport::{ArtifactTransport, LocalDirTransport, TransportEntry};
pub use types::{NodePlatform, ReleaseId, TargetTriple, Trigger};
pub use workflow::{PublishOptions, PublishPipeline, PublishReport, ReleaseStatus, StageOutcome};
