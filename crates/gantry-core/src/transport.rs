//! Artifact transport between build workers and the publish job

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::ArtifactError;
use crate::types::TargetTriple;

/// One stored artifact, addressed by triple and file name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransportEntry {
    /// Target the artifact was built for
    pub triple: TargetTriple,
    /// Artifact file name
    pub file_name: String,
}

impl TransportEntry {
    /// Create an entry
    pub fn new(triple: TargetTriple, file_name: impl Into<String>) -> Self {
        Self {
            triple,
            file_name: file_name.into(),
        }
    }
}

/// Storage shared between build workers and the publish job
#[async_trait]
pub trait ArtifactTransport: Send + Sync {
    /// Transport name for logs
    fn name(&self) -> &str;

    /// Store an artifact, overwriting any previous upload for the entry
    async fn upload(&self, entry: &TransportEntry, bytes: &[u8]) -> Result<(), ArtifactError>;

    /// Fetch an artifact
    async fn download(&self, entry: &TransportEntry) -> Result<Vec<u8>, ArtifactError>;

    /// Everything currently stored
    async fn list(&self) -> Result<Vec<TransportEntry>, ArtifactError>;
}

/// Transport over a local (or mounted) directory: `<root>/<triple>/<file>`
#[derive(Debug, Clone)]
pub struct LocalDirTransport {
    root: PathBuf,
}

impl LocalDirTransport {
    /// Create a transport rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, entry: &TransportEntry) -> Result<PathBuf, ArtifactError> {
        let name = &entry.file_name;
        if name.is_empty() || name.contains('/') || name.contains('\\') || name == ".." {
            return Err(ArtifactError::Transport(format!(
                "invalid artifact file name '{}'",
                name
            )));
        }
        Ok(self.root.join(entry.triple.as_str()).join(name))
    }
}

fn transport_err(context: &str, path: &Path, e: std::io::Error) -> ArtifactError {
    ArtifactError::Transport(format!("{} {}: {}", context, path.display(), e))
}

#[async_trait]
impl ArtifactTransport for LocalDirTransport {
    fn name(&self) -> &str {
        "local-dir"
    }

    #[instrument(skip(self, bytes), fields(triple = %entry.triple, size = bytes.len()))]
    async fn upload(&self, entry: &TransportEntry, bytes: &[u8]) -> Result<(), ArtifactError> {
        let path = self.entry_path(entry)?;
        let dir = self.root.join(entry.triple.as_str());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| transport_err("failed to create", &dir, e))?;

        // A triple holds one artifact at a time
        let mut existing = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| transport_err("failed to read", &dir, e))?;
        while let Some(item) = existing
            .next_entry()
            .await
            .map_err(|e| transport_err("failed to read", &dir, e))?
        {
            if item.path() != path {
                tokio::fs::remove_file(item.path())
                    .await
                    .map_err(|e| transport_err("failed to remove", &item.path(), e))?;
            }
        }

        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| transport_err("failed to write", &path, e))?;
        debug!(path = %path.display(), "artifact uploaded");
        Ok(())
    }

    async fn download(&self, entry: &TransportEntry) -> Result<Vec<u8>, ArtifactError> {
        let path = self.entry_path(entry)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| transport_err("failed to read", &path, e))
    }

    async fn list(&self) -> Result<Vec<TransportEntry>, ArtifactError> {
        let mut entries = Vec::new();
        if !self.root.exists() {
            return Ok(entries);
        }

        let mut dirs = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| transport_err("failed to read", &self.root, e))?;
        while let Some(dir) = dirs
            .next_entry()
            .await
            .map_err(|e| transport_err("failed to read", &self.root, e))?
        {
            let Some(triple) = dir
                .file_name()
                .to_str()
                .and_then(|n| TargetTriple::parse(n).ok())
            else {
                debug!(path = %dir.path().display(), "skipping non-target entry");
                continue;
            };
            if !dir.path().is_dir() {
                continue;
            }

            let mut files = tokio::fs::read_dir(dir.path())
                .await
                .map_err(|e| transport_err("failed to read", &dir.path(), e))?;
            while let Some(file) = files
                .next_entry()
                .await
                .map_err(|e| transport_err("failed to read", &dir.path(), e))?
            {
                if let Some(name) = file.file_name().to_str() {
                    entries.push(TransportEntry::new(triple.clone(), name));
                }
            }
        }

        entries.sort_by(|a, b| a.triple.cmp(&b.triple).then(a.file_name.cmp(&b.file_name)));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(triple: &str, file: &str) -> TransportEntry {
        TransportEntry::new(TargetTriple::parse(triple).unwrap(), file)
    }

    #[tokio::test]
    async fn test_upload_list_download() {
        let temp = TempDir::new().unwrap();
        let transport = LocalDirTransport::new(temp.path());

        let linux = entry("x86_64-unknown-linux-gnu", "cli.linux-x64-gnu.node");
        let mac = entry("aarch64-apple-darwin", "cli.darwin-arm64.node");
        transport.upload(&linux, b"linux").await.unwrap();
        transport.upload(&mac, b"mac").await.unwrap();

        let listed = transport.list().await.unwrap();
        assert_eq!(listed, vec![mac.clone(), linux.clone()]);
        assert_eq!(transport.download(&linux).await.unwrap(), b"linux");
    }

    #[tokio::test]
    async fn test_upload_replaces_previous_artifact() {
        let temp = TempDir::new().unwrap();
        let transport = LocalDirTransport::new(temp.path());

        transport
            .upload(&entry("x86_64-apple-darwin", "old.node"), b"1")
            .await
            .unwrap();
        transport
            .upload(&entry("x86_64-apple-darwin", "cli.darwin-x64.node"), b"2")
            .await
            .unwrap();

        let listed = transport.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].file_name, "cli.darwin-x64.node");
    }

    #[tokio::test]
    async fn test_list_missing_root_is_empty() {
        let temp = TempDir::new().unwrap();
        let transport = LocalDirTransport::new(temp.path().join("nope"));
        assert!(transport.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_path_in_file_name() {
        let temp = TempDir::new().unwrap();
        let transport = LocalDirTransport::new(temp.path());
        let result = transport
            .upload(&entry("x86_64-apple-darwin", "../escape.node"), b"x")
            .await;
        assert!(result.is_err());
    }
}
