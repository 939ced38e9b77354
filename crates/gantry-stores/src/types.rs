//! Common types for registry sinks

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};

use crate::error::{Result, StoreError};

/// Prefix npm expects for every entry in a package tarball
const TARBALL_ROOT: &str = "package";

/// A single file shipped inside a package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadFile {
    /// Path relative to the package root (forward slashes)
    pub path: String,
    /// File contents
    pub contents: Vec<u8>,
    /// Unix permission bits
    pub mode: u32,
}

impl PayloadFile {
    /// Create a regular (0644) file
    pub fn new(path: impl Into<String>, contents: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            contents,
            mode: 0o644,
        }
    }

    /// Mark the file as executable (0755)
    pub fn executable(mut self) -> Self {
        self.mode = 0o755;
        self
    }
}

/// Everything a registry needs to publish one package version
#[derive(Debug, Clone)]
pub struct PublishPayload {
    /// Package name
    pub name: String,
    /// Package version
    pub version: String,
    /// Dist-tag to publish under
    pub tag: String,
    /// Manifest document (written as `package.json`)
    pub manifest: serde_json::Value,
    /// Files shipped alongside the manifest
    pub files: Vec<PayloadFile>,
}

impl PublishPayload {
    /// Create a payload with no files
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        manifest: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            tag: "latest".to_string(),
            manifest,
            files: Vec::new(),
        }
    }

    /// Set the dist-tag
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    /// Add a file
    pub fn with_file(mut self, file: PayloadFile) -> Self {
        self.files.push(file);
        self
    }

    /// Paths of every shipped file, manifest included
    pub fn file_names(&self) -> Vec<String> {
        let mut names = vec!["package.json".to_string()];
        names.extend(self.files.iter().map(|f| f.path.clone()));
        names
    }

    /// Total size of shipped file contents in bytes
    pub fn unpacked_size(&self) -> u64 {
        self.files.iter().map(|f| f.contents.len() as u64).sum()
    }

    /// Assemble the gzipped package tarball
    pub fn tarball(&self) -> Result<Vec<u8>> {
        if self.name.is_empty() {
            return Err(StoreError::InvalidPayload(
                "package name is required".to_string(),
            ));
        }

        let manifest = serde_json::to_vec_pretty(&self.manifest)?;
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);

        append_entry(&mut builder, "package.json", &manifest, 0o644)?;
        for file in &self.files {
            if file.path.is_empty() || file.path.starts_with('/') || file.path.contains("..") {
                return Err(StoreError::InvalidPayload(format!(
                    "file path '{}' must be relative to the package root",
                    file.path
                )));
            }
            append_entry(&mut builder, &file.path, &file.contents, file.mode)?;
        }

        let encoder = builder.into_inner()?;
        Ok(encoder.finish()?)
    }
}

fn append_entry(
    builder: &mut tar::Builder<GzEncoder<Vec<u8>>>,
    path: &str,
    contents: &[u8],
    mode: u32,
) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(mode);
    header.set_mtime(0);
    builder.append_data(&mut header, format!("{}/{}", TARBALL_ROOT, path), contents)?;
    Ok(())
}

/// Subresource integrity string (`sha512-<base64>`) for a tarball
pub fn integrity(tarball: &[u8]) -> String {
    format!("sha512-{}", BASE64.encode(Sha512::digest(tarball)))
}

/// Proof that a registry accepted a package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReceipt {
    /// Registry that accepted the package
    pub registry: String,
    /// Published package name
    pub name: String,
    /// Published version
    pub version: String,
    /// Dist-tag the version was published under
    pub tag: String,
    /// Files contained in the published tarball
    pub files: Vec<String>,
    /// Tarball integrity
    pub integrity: String,
    /// Web URL for the package, if the registry has one
    pub console_url: Option<String>,
    /// When the registry accepted the package
    pub published_at: DateTime<Utc>,
}
