//! Two-stage publish of the aggregated artifact set

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use gantry_stores::{PayloadFile, PublishPayload, PublishReceipt, RegistrySink};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::artifacts::ArtifactSet;
use crate::error::PipelineError;
use crate::manifest::{PackageManifest, SecondaryIdentity};
use crate::matrix::TargetMatrix;
use crate::types::{ReleaseId, TargetTriple};

/// Options for a publish run
#[derive(Debug, Clone)]
pub struct PublishOptions {
    /// Dist-tag for both stages
    pub tag: String,
    /// Second identity; stage two is skipped when absent
    pub secondary: Option<SecondaryIdentity>,
    /// Directory the manifest's entry-point paths are relative to
    pub project_root: PathBuf,
    /// Release this publish belongs to
    pub release: Option<ReleaseId>,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            tag: "latest".to_string(),
            secondary: None,
            project_root: PathBuf::from("."),
            release: None,
        }
    }
}

impl PublishOptions {
    /// Set the dist-tag
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    /// Enable the secondary publish
    pub fn with_secondary(mut self, identity: SecondaryIdentity) -> Self {
        self.secondary = Some(identity);
        self
    }

    /// Set the project root
    pub fn with_project_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.project_root = root.into();
        self
    }

    /// Attach a release identifier
    pub fn with_release(mut self, release: ReleaseId) -> Self {
        self.release = Some(release);
        self
    }
}

/// Result of one publish stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageOutcome {
    /// Registry accepted the package
    Published { receipt: PublishReceipt },
    /// Registry refused the package or could not be reached
    Failed {
        package: String,
        error: String,
        rejected: bool,
    },
    /// Stage disabled by configuration
    Skipped,
    /// Stage not run because an earlier stage failed
    NotAttempted,
}

impl StageOutcome {
    /// Whether the stage published
    pub fn is_published(&self) -> bool {
        matches!(self, Self::Published { .. })
    }
}

/// Overall state of a release after publishing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseStatus {
    /// Every enabled stage published
    Complete,
    /// Primary published, secondary failed
    PrimaryOnly,
    /// Nothing was published
    PrimaryFailed,
}

/// Outcome of a publish run
#[derive(Debug, Clone, Serialize)]
pub struct PublishReport {
    /// Release identifier, if known
    pub release: Option<ReleaseId>,
    /// Triples whose artifacts were shipped
    pub targets: Vec<TargetTriple>,
    /// Primary stage
    pub primary: StageOutcome,
    /// Secondary stage
    pub secondary: StageOutcome,
    /// Overall status
    pub status: ReleaseStatus,
}

impl PublishReport {
    /// Whether the release is fully published
    pub fn is_complete(&self) -> bool {
        self.status == ReleaseStatus::Complete
    }
}

/// Validates an artifact set and publishes it under both package identities
pub struct PublishPipeline {
    matrix: Arc<TargetMatrix>,
    sink: Arc<dyn RegistrySink>,
    options: PublishOptions,
}

impl PublishPipeline {
    /// Create a pipeline publishing to `sink`
    pub fn new(matrix: Arc<TargetMatrix>, sink: Arc<dyn RegistrySink>, options: PublishOptions) -> Self {
        Self {
            matrix,
            sink,
            options,
        }
    }

    /// Run validate, publish-primary and derive-publish-secondary.
    ///
    /// Validation failures return `Err` before the registry is contacted.
    /// Registry failures are reported per stage in the returned report.
    #[instrument(skip_all, fields(package = %manifest.name, version = %manifest.version, sink = self.sink.name()))]
    pub async fn publish(
        &self,
        manifest: &PackageManifest,
        artifacts: &ArtifactSet,
    ) -> Result<PublishReport, PipelineError> {
        let files = self.validate(manifest, artifacts).await?;
        info!(
            targets = artifacts.len(),
            files = files.len(),
            release = self.options.release.as_ref().map(|r| r.as_str()),
            "artifact set validated"
        );

        let mut report = PublishReport {
            release: self.options.release.clone(),
            targets: artifacts.triples(),
            primary: StageOutcome::NotAttempted,
            secondary: StageOutcome::NotAttempted,
            status: ReleaseStatus::PrimaryFailed,
        };

        let primary = self.payload(manifest, files.clone())?;
        report.primary = self.publish_stage(primary).await;
        if !report.primary.is_published() {
            warn!("primary publish failed, secondary not attempted");
            return Ok(report);
        }

        let Some(identity) = &self.options.secondary else {
            debug!("secondary publish disabled");
            report.secondary = StageOutcome::Skipped;
            report.status = ReleaseStatus::Complete;
            return Ok(report);
        };

        let derived = manifest
            .derive_secondary(identity)
            .map_err(|e| PipelineError::ManifestInvalid(e.to_string()))?;
        let secondary = self.payload(&derived, files)?;
        report.secondary = self.publish_stage(secondary).await;
        report.status = if report.secondary.is_published() {
            ReleaseStatus::Complete
        } else {
            warn!(package = %derived.name, "secondary publish failed, primary publish stands");
            ReleaseStatus::PrimaryOnly
        };

        Ok(report)
    }

    /// Check the set against the matrix and the manifest, then load every file
    /// that will ship
    async fn validate(
        &self,
        manifest: &PackageManifest,
        artifacts: &ArtifactSet,
    ) -> Result<Vec<PayloadFile>, PipelineError> {
        let expected: BTreeSet<TargetTriple> = self.matrix.triples().into_iter().collect();
        let actual: BTreeSet<TargetTriple> = artifacts.triples().into_iter().collect();
        if expected != actual {
            return Err(PipelineError::AggregationIncomplete {
                missing: expected.difference(&actual).cloned().collect(),
                unexpected: actual.difference(&expected).cloned().collect(),
            });
        }

        manifest
            .validate()
            .map_err(|e| PipelineError::ManifestInvalid(e.to_string()))?;

        if let Some(identity) = &self.options.secondary {
            if identity.name == manifest.name {
                return Err(PipelineError::ManifestInvalid(format!(
                    "secondary package name '{}' must differ from the primary",
                    identity.name
                )));
            }
        }

        let mut files = self.entry_point_files(manifest).await?;
        for artifact in artifacts.iter() {
            files.push(PayloadFile::new(artifact.file_name(), artifact.read().await?));
        }
        Ok(files)
    }

    async fn entry_point_files(
        &self,
        manifest: &PackageManifest,
    ) -> Result<Vec<PayloadFile>, PipelineError> {
        let bins: BTreeSet<String> = manifest
            .bin_entries()
            .into_values()
            .map(|p| normalize(&p))
            .collect();

        let mut files = Vec::new();
        for path in &bins {
            let contents = read_entry(&self.options.project_root, path).await?;
            files.push(PayloadFile::new(path.clone(), contents).executable());
        }

        if let Some(main) = manifest.main.as_deref().map(normalize) {
            if !bins.contains(&main) {
                files.push(PayloadFile::new(
                    main.clone(),
                    read_entry(&self.options.project_root, &main).await?,
                ));
            }
        }

        Ok(files)
    }

    fn payload(
        &self,
        manifest: &PackageManifest,
        files: Vec<PayloadFile>,
    ) -> Result<PublishPayload, PipelineError> {
        let document = manifest
            .to_value()
            .map_err(|e| PipelineError::ManifestInvalid(e.to_string()))?;
        let mut payload = PublishPayload::new(&manifest.name, &manifest.version, document)
            .with_tag(&self.options.tag);
        payload.files = files;
        Ok(payload)
    }

    async fn publish_stage(&self, payload: PublishPayload) -> StageOutcome {
        let package = payload.name.clone();
        info!(package = %package, tag = %payload.tag, files = payload.files.len(), "publishing");

        match self.sink.publish(&payload).await {
            Ok(receipt) => {
                info!(package = %receipt.name, version = %receipt.version, "published");
                StageOutcome::Published { receipt }
            }
            Err(e) => {
                warn!(package = %package, error = %e, "publish failed");
                StageOutcome::Failed {
                    package,
                    rejected: e.is_rejection(),
                    error: e.to_string(),
                }
            }
        }
    }
}

fn normalize(path: &str) -> String {
    path.trim_start_matches("./").to_string()
}

async fn read_entry(root: &Path, path: &str) -> Result<Vec<u8>, PipelineError> {
    let full = root.join(path);
    tokio::fs::read(&full).await.map_err(|e| {
        PipelineError::ManifestInvalid(format!(
            "entry point '{}' unreadable at {}: {}",
            path,
            full.display(),
            e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ArtifactStore;
    use crate::matrix::TargetDescriptor;
    use gantry_stores::MemoryRegistry;
    use tempfile::TempDir;

    const PRIMARY: &str = "@scope/addon-cli";
    const SECONDARY: &str = "create-addon";

    const TRIPLES: [&str; 3] = [
        "x86_64-unknown-linux-gnu",
        "aarch64-apple-darwin",
        "x86_64-pc-windows-msvc",
    ];

    fn t(s: &str) -> TargetTriple {
        TargetTriple::parse(s).unwrap()
    }

    struct Fixture {
        temp: TempDir,
        matrix: Arc<TargetMatrix>,
        manifest: PackageManifest,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("cli.js"), "#!/usr/bin/env node\n").unwrap();
        std::fs::write(temp.path().join("index.js"), "module.exports = {}\n").unwrap();

        let manifest: PackageManifest = serde_json::from_value(serde_json::json!({
            "name": PRIMARY,
            "version": "1.4.0",
            "main": "index.js",
            "bin": { "addon-cli": "./cli.js" },
            "scripts": { "prepublishOnly": "napi prepublish" }
        }))
        .unwrap();

        let targets = TRIPLES
            .iter()
            .map(|s| TargetDescriptor::new(t(s), "true"))
            .collect();
        let matrix = Arc::new(TargetMatrix::new(targets).unwrap());

        Fixture {
            temp,
            matrix,
            manifest,
        }
    }

    async fn artifacts(fx: &Fixture, triples: &[&str]) -> ArtifactSet {
        let store = ArtifactStore::new(Arc::clone(&fx.matrix));
        for triple in triples {
            let descriptor = fx.matrix.get(&t(triple)).unwrap();
            let path = fx.temp.path().join(descriptor.artifact_name("cli"));
            std::fs::write(&path, triple.as_bytes()).unwrap();
            store.deposit(&t(triple), &path).await.unwrap();
        }
        store.collect_available().unwrap().artifacts
    }

    fn pipeline(fx: &Fixture, sink: Arc<MemoryRegistry>) -> PublishPipeline {
        let options = PublishOptions::default()
            .with_project_root(fx.temp.path())
            .with_secondary(SecondaryIdentity::new(SECONDARY))
            .with_release(ReleaseId::new("v1.4.0"));
        PublishPipeline::new(Arc::clone(&fx.matrix), sink, options)
    }

    #[tokio::test]
    async fn test_full_matrix_publishes_both_identities() {
        let fx = fixture();
        let sink = Arc::new(MemoryRegistry::new());
        let report = pipeline(&fx, Arc::clone(&sink))
            .publish(&fx.manifest, &artifacts(&fx, &TRIPLES).await)
            .await
            .unwrap();

        assert_eq!(report.status, ReleaseStatus::Complete);
        let accepted = sink.accepted();
        assert_eq!(accepted.len(), 2);
        assert_eq!(accepted[0].name, PRIMARY);
        assert_eq!(accepted[1].name, SECONDARY);

        // Both packages ship the same three binaries
        for payload in &accepted {
            let binaries = payload
                .files
                .iter()
                .filter(|f| f.path.ends_with(".node"))
                .count();
            assert_eq!(binaries, 3);
        }
        assert_eq!(accepted[0].files, accepted[1].files);
    }

    #[tokio::test]
    async fn test_secondary_manifest_points_at_primary_entry() {
        let fx = fixture();
        let sink = Arc::new(MemoryRegistry::new());
        pipeline(&fx, Arc::clone(&sink))
            .publish(&fx.manifest, &artifacts(&fx, &TRIPLES).await)
            .await
            .unwrap();

        let secondary = &sink.accepted()[1];
        assert_eq!(secondary.manifest["name"], SECONDARY);
        assert_eq!(secondary.manifest["bin"][SECONDARY], "./cli.js");
        assert!(secondary.manifest["scripts"].get("prepublishOnly").is_none());
        assert!(secondary.files.iter().any(|f| f.path == "cli.js"));

        // Primary document is not altered by the derivation
        let primary = &sink.accepted()[0];
        assert_eq!(primary.manifest["name"], PRIMARY);
        assert_eq!(primary.manifest["scripts"]["prepublishOnly"], "napi prepublish");
    }

    #[tokio::test]
    async fn test_missing_target_stops_before_registry() {
        let fx = fixture();
        let sink = Arc::new(MemoryRegistry::new());
        let err = pipeline(&fx, Arc::clone(&sink))
            .publish(&fx.manifest, &artifacts(&fx, &TRIPLES[..2]).await)
            .await
            .unwrap_err();

        match err {
            PipelineError::AggregationIncomplete { missing, unexpected } => {
                assert_eq!(missing, vec![t("x86_64-pc-windows-msvc")]);
                assert!(unexpected.is_empty());
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(sink.calls().is_empty());
    }

    #[tokio::test]
    async fn test_primary_rejection_skips_secondary() {
        let fx = fixture();
        let sink = Arc::new(MemoryRegistry::new().reject(PRIMARY, 403, "forbidden"));
        let set = artifacts(&fx, &TRIPLES).await;
        let report = pipeline(&fx, Arc::clone(&sink))
            .publish(&fx.manifest, &set)
            .await
            .unwrap();

        assert_eq!(report.status, ReleaseStatus::PrimaryFailed);
        assert!(matches!(
            report.primary,
            StageOutcome::Failed { rejected: true, .. }
        ));
        assert_eq!(report.secondary, StageOutcome::NotAttempted);
        assert_eq!(sink.calls_for(SECONDARY), 0);

        // Artifacts are still on disk for a retry
        for artifact in set.iter() {
            assert!(artifact.path.exists());
        }
    }

    #[tokio::test]
    async fn test_secondary_rejection_leaves_primary() {
        let fx = fixture();
        let sink = Arc::new(MemoryRegistry::new().reject(SECONDARY, 403, "name taken"));
        let report = pipeline(&fx, Arc::clone(&sink))
            .publish(&fx.manifest, &artifacts(&fx, &TRIPLES).await)
            .await
            .unwrap();

        assert_eq!(report.status, ReleaseStatus::PrimaryOnly);
        assert!(report.primary.is_published());
        assert_eq!(sink.accepted().len(), 1);
    }

    #[tokio::test]
    async fn test_secondary_disabled() {
        let fx = fixture();
        let sink = Arc::new(MemoryRegistry::new());
        let options = PublishOptions::default().with_project_root(fx.temp.path());
        let report = PublishPipeline::new(Arc::clone(&fx.matrix), sink.clone(), options)
            .publish(&fx.manifest, &artifacts(&fx, &TRIPLES).await)
            .await
            .unwrap();

        assert_eq!(report.status, ReleaseStatus::Complete);
        assert_eq!(report.secondary, StageOutcome::Skipped);
        assert_eq!(sink.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_manifest_without_bin_rejected() {
        let fx = fixture();
        let mut manifest = fx.manifest.clone();
        manifest.bin = None;
        let sink = Arc::new(MemoryRegistry::new());

        let err = pipeline(&fx, Arc::clone(&sink))
            .publish(&manifest, &artifacts(&fx, &TRIPLES).await)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ManifestInvalid(_)));
        assert!(sink.calls().is_empty());
    }

    #[tokio::test]
    async fn test_secondary_name_must_differ() {
        let fx = fixture();
        let sink = Arc::new(MemoryRegistry::new());
        let options = PublishOptions::default()
            .with_project_root(fx.temp.path())
            .with_secondary(SecondaryIdentity::new(PRIMARY));

        let err = PublishPipeline::new(Arc::clone(&fx.matrix), sink.clone(), options)
            .publish(&fx.manifest, &artifacts(&fx, &TRIPLES).await)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ManifestInvalid(_)));
        assert!(sink.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_entry_point_file() {
        let fx = fixture();
        std::fs::remove_file(fx.temp.path().join("cli.js")).unwrap();
        let sink = Arc::new(MemoryRegistry::new());

        let err = pipeline(&fx, Arc::clone(&sink))
            .publish(&fx.manifest, &artifacts(&fx, &TRIPLES).await)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cli.js"));
        assert!(sink.calls().is_empty());
    }
}
