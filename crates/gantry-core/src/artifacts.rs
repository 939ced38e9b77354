//! Artifact collection
//!
//! Build tasks deposit their output here concurrently. Once every task has
//! joined, the publish side collects the full set exactly as deposited.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use crate::error::ArtifactError;
use crate::matrix::TargetMatrix;
use crate::transport::{ArtifactTransport, TransportEntry};
use crate::types::TargetTriple;

/// One built binary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Target it was built for
    pub triple: TargetTriple,
    /// Location on disk
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
    /// Hex SHA-256 of the contents
    pub sha256: String,
}

impl Artifact {
    /// Describe an artifact file, hashing its contents
    pub async fn from_file(triple: TargetTriple, path: &Path) -> Result<Self, ArtifactError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| ArtifactError::Unreadable {
            triple: triple.clone(),
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            triple,
            path: path.to_path_buf(),
            size: bytes.len() as u64,
            sha256: format!("{:x}", Sha256::digest(&bytes)),
        })
    }

    /// File name of the artifact
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Read the artifact contents
    pub async fn read(&self) -> Result<Vec<u8>, ArtifactError> {
        tokio::fs::read(&self.path).await.map_err(|e| ArtifactError::Unreadable {
            triple: self.triple.clone(),
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }
}

/// Collected artifacts keyed by triple
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactSet {
    artifacts: BTreeMap<TargetTriple, Artifact>,
}

impl ArtifactSet {
    /// Number of artifacts
    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// Artifact for a triple
    pub fn get(&self, triple: &TargetTriple) -> Option<&Artifact> {
        self.artifacts.get(triple)
    }

    /// Triples in the set, sorted
    pub fn triples(&self) -> Vec<TargetTriple> {
        self.artifacts.keys().cloned().collect()
    }

    /// Artifacts sorted by triple
    pub fn iter(&self) -> impl Iterator<Item = &Artifact> {
        self.artifacts.values()
    }

    /// Total size in bytes
    pub fn total_size(&self) -> u64 {
        self.artifacts.values().map(|a| a.size).sum()
    }

    /// Upload every artifact to a transport
    #[instrument(skip(self, transport), fields(transport = transport.name(), count = self.len()))]
    pub async fn upload_to(&self, transport: &dyn ArtifactTransport) -> Result<(), ArtifactError> {
        for artifact in self.iter() {
            let bytes = artifact.read().await?;
            let entry = TransportEntry::new(artifact.triple.clone(), artifact.file_name());
            transport.upload(&entry, &bytes).await?;
        }
        info!(count = self.len(), "artifacts uploaded");
        Ok(())
    }
}

impl FromIterator<Artifact> for ArtifactSet {
    fn from_iter<I: IntoIterator<Item = Artifact>>(iter: I) -> Self {
        Self {
            artifacts: iter.into_iter().map(|a| (a.triple.clone(), a)).collect(),
        }
    }
}

/// Partial collection for degraded publishing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialCollection {
    /// Artifacts that were deposited
    pub artifacts: ArtifactSet,
    /// Matrix triples with no artifact, in matrix order
    pub missing: Vec<TargetTriple>,
}

impl PartialCollection {
    /// Whether every matrix target is present
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Fan-in collector shared by all build tasks
#[derive(Debug)]
pub struct ArtifactStore {
    matrix: Arc<TargetMatrix>,
    artifacts: Mutex<HashMap<TargetTriple, Artifact>>,
}

impl ArtifactStore {
    /// Create an empty store for a matrix
    pub fn new(matrix: Arc<TargetMatrix>) -> Self {
        Self {
            matrix,
            artifacts: Mutex::new(HashMap::new()),
        }
    }

    /// Matrix this store collects for
    pub fn matrix(&self) -> &TargetMatrix {
        &self.matrix
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<TargetTriple, Artifact>>, ArtifactError> {
        self.artifacts.lock().map_err(|_| ArtifactError::Poisoned)
    }

    fn check_known(&self, triple: &TargetTriple) -> Result<(), ArtifactError> {
        if self.matrix.contains(triple) {
            Ok(())
        } else {
            Err(ArtifactError::UnknownTarget(triple.clone()))
        }
    }

    /// Record the artifact of a successful target. Each triple may be
    /// deposited once.
    pub async fn deposit(
        &self,
        triple: &TargetTriple,
        path: &Path,
    ) -> Result<Artifact, ArtifactError> {
        self.check_known(triple)?;
        let artifact = Artifact::from_file(triple.clone(), path).await?;

        let mut artifacts = self.lock()?;
        if artifacts.contains_key(triple) {
            return Err(ArtifactError::Duplicate(triple.clone()));
        }
        artifacts.insert(triple.clone(), artifact.clone());
        debug!(%triple, size = artifact.size, "artifact deposited");
        Ok(artifact)
    }

    /// Record an artifact, overwriting any earlier one for the triple
    pub async fn replace(
        &self,
        triple: &TargetTriple,
        path: &Path,
    ) -> Result<Artifact, ArtifactError> {
        self.check_known(triple)?;
        let artifact = Artifact::from_file(triple.clone(), path).await?;

        let previous = self.lock()?.insert(triple.clone(), artifact.clone());
        debug!(%triple, replaced = previous.is_some(), "artifact replaced");
        Ok(artifact)
    }

    /// Number of deposited artifacts
    pub fn len(&self) -> usize {
        self.artifacts.lock().map(|a| a.len()).unwrap_or(0)
    }

    /// Whether nothing has been deposited
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a triple has been deposited
    pub fn contains(&self, triple: &TargetTriple) -> bool {
        self.artifacts
            .lock()
            .map(|a| a.contains_key(triple))
            .unwrap_or(false)
    }

    /// Everything deposited so far plus the triples still missing
    pub fn collect_available(&self) -> Result<PartialCollection, ArtifactError> {
        let artifacts = self.lock()?;
        let missing = self
            .matrix
            .targets()
            .iter()
            .map(|t| &t.triple)
            .filter(|t| !artifacts.contains_key(*t))
            .cloned()
            .collect();

        Ok(PartialCollection {
            artifacts: artifacts.values().cloned().collect(),
            missing,
        })
    }

    /// The complete artifact set; fails naming every missing triple
    pub fn collect_all(&self) -> Result<ArtifactSet, ArtifactError> {
        let collection = self.collect_available()?;
        if !collection.is_complete() {
            return Err(ArtifactError::Incomplete {
                missing: collection.missing,
            });
        }
        Ok(collection.artifacts)
    }

    /// Download artifacts from a transport into `dest` and deposit them.
    ///
    /// Entries for triples outside the matrix are skipped, as are triples that
    /// already have an artifact in this store. Returns the number deposited.
    #[instrument(skip(self, transport), fields(transport = transport.name()))]
    pub async fn hydrate(
        &self,
        transport: &dyn ArtifactTransport,
        dest: &Path,
    ) -> Result<usize, ArtifactError> {
        let entries = transport.list().await?;
        tokio::fs::create_dir_all(dest)
            .await
            .map_err(|e| ArtifactError::Transport(format!("{}: {}", dest.display(), e)))?;

        let mut deposited = 0;
        for entry in entries {
            if !self.matrix.contains(&entry.triple) {
                warn!(triple = %entry.triple, "transport holds an artifact outside the matrix, skipping");
                continue;
            }
            if self.contains(&entry.triple) {
                debug!(triple = %entry.triple, "artifact already present, skipping");
                continue;
            }

            let bytes = transport.download(&entry).await?;
            let path = dest.join(&entry.file_name);
            tokio::fs::write(&path, &bytes)
                .await
                .map_err(|e| ArtifactError::Transport(format!("{}: {}", path.display(), e)))?;
            self.deposit(&entry.triple, &path).await?;
            deposited += 1;
        }

        info!(deposited, total = self.len(), "store hydrated from transport");
        Ok(deposited)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::TargetDescriptor;
    use crate::transport::LocalDirTransport;
    use tempfile::TempDir;

    fn t(s: &str) -> TargetTriple {
        TargetTriple::parse(s).unwrap()
    }

    fn matrix(triples: &[&str]) -> Arc<TargetMatrix> {
        let targets = triples
            .iter()
            .map(|s| TargetDescriptor::new(t(s), "true"))
            .collect();
        Arc::new(TargetMatrix::new(targets).unwrap())
    }

    fn write(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    const TRIPLES: [&str; 3] = [
        "x86_64-unknown-linux-gnu",
        "aarch64-apple-darwin",
        "x86_64-pc-windows-msvc",
    ];

    #[tokio::test]
    async fn test_collect_all_complete() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::new(matrix(&TRIPLES));

        for triple in TRIPLES {
            let path = write(temp.path(), &format!("{}.node", triple), triple.as_bytes());
            store.deposit(&t(triple), &path).await.unwrap();
        }

        let set = store.collect_all().unwrap();
        assert_eq!(set.len(), 3);
        let artifact = set.get(&t("aarch64-apple-darwin")).unwrap();
        assert_eq!(artifact.size, "aarch64-apple-darwin".len() as u64);
        assert_eq!(artifact.sha256.len(), 64);
    }

    #[tokio::test]
    async fn test_collect_all_names_missing() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::new(matrix(&TRIPLES));
        let path = write(temp.path(), "a.node", b"a");
        store.deposit(&t("x86_64-unknown-linux-gnu"), &path).await.unwrap();
        store.deposit(&t("x86_64-pc-windows-msvc"), &path).await.unwrap();

        match store.collect_all() {
            Err(ArtifactError::Incomplete { missing }) => {
                assert_eq!(missing, vec![t("aarch64-apple-darwin")]);
            }
            other => panic!("expected incomplete, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_collect_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::new(matrix(&TRIPLES[..1]));
        let path = write(temp.path(), "a.node", b"a");
        store.deposit(&t(TRIPLES[0]), &path).await.unwrap();

        let first = store.collect_all().unwrap();
        let second = store.collect_all().unwrap();
        assert_eq!(first, second);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_deposit_rejected() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::new(matrix(&TRIPLES));
        let path = write(temp.path(), "a.node", b"a");
        store.deposit(&t(TRIPLES[0]), &path).await.unwrap();

        let err = store.deposit(&t(TRIPLES[0]), &path).await.unwrap_err();
        assert!(matches!(err, ArtifactError::Duplicate(_)));

        let replacement = write(temp.path(), "b.node", b"bb");
        let artifact = store.replace(&t(TRIPLES[0]), &replacement).await.unwrap();
        assert_eq!(artifact.size, 2);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_target_rejected() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::new(matrix(&TRIPLES));
        let path = write(temp.path(), "a.node", b"a");
        let err = store
            .deposit(&t("riscv64gc-unknown-linux-gnu"), &path)
            .await
            .unwrap_err();
        assert!(matches!(err, ArtifactError::UnknownTarget(_)));
    }

    #[tokio::test]
    async fn test_missing_file_unreadable() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::new(matrix(&TRIPLES));
        let err = store
            .deposit(&t(TRIPLES[0]), &temp.path().join("missing.node"))
            .await
            .unwrap_err();
        assert!(matches!(err, ArtifactError::Unreadable { .. }));
        assert!(store.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 3)]
    async fn test_concurrent_deposits() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(ArtifactStore::new(matrix(&TRIPLES)));

        let handles: Vec<_> = TRIPLES
            .iter()
            .map(|triple| {
                let store = Arc::clone(&store);
                let path = write(temp.path(), &format!("{}.node", triple), b"bin");
                let triple = t(triple);
                tokio::spawn(async move { store.deposit(&triple, &path).await.map(|_| ()) })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(store.collect_all().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_collect_available_partial() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::new(matrix(&TRIPLES));
        let path = write(temp.path(), "a.node", b"a");
        store.deposit(&t("aarch64-apple-darwin"), &path).await.unwrap();

        let partial = store.collect_available().unwrap();
        assert!(!partial.is_complete());
        assert_eq!(partial.artifacts.len(), 1);
        assert_eq!(
            partial.missing,
            vec![t("x86_64-unknown-linux-gnu"), t("x86_64-pc-windows-msvc")]
        );
    }

    #[tokio::test]
    async fn test_upload_then_hydrate() {
        let temp = TempDir::new().unwrap();
        let transport = LocalDirTransport::new(temp.path().join("transport"));
        let store = ArtifactStore::new(matrix(&TRIPLES[..2]));

        for triple in &TRIPLES[..2] {
            let path = write(temp.path(), &format!("cli.{}.node", triple), b"bin");
            store.deposit(&t(triple), &path).await.unwrap();
        }
        let set = store.collect_all().unwrap();
        set.upload_to(&transport).await.unwrap();

        let fresh = ArtifactStore::new(matrix(&TRIPLES[..2]));
        let count = fresh
            .hydrate(&transport, &temp.path().join("downloaded"))
            .await
            .unwrap();
        assert_eq!(count, 2);

        let hydrated = fresh.collect_all().unwrap();
        for artifact in set.iter() {
            assert_eq!(
                hydrated.get(&artifact.triple).unwrap().sha256,
                artifact.sha256
            );
        }
    }
}
