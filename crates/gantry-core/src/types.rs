//! Common types used throughout Gantry

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{GantryError, MatrixError, Result};

/// Rust target triple identifying one build configuration
/// (`<cpu>-<vendor>-<os>[-<abi>]`, or `<cpu>-<os>-<abi>` for Android).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TargetTriple(String);

impl TargetTriple {
    /// Parse and validate a triple
    pub fn parse(s: &str) -> std::result::Result<Self, MatrixError> {
        let s = s.trim();
        let parts: Vec<&str> = s.split('-').collect();
        let valid_chars = s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');

        if !valid_chars || parts.len() < 3 || parts.len() > 4 || parts.iter().any(|p| p.is_empty())
        {
            return Err(MatrixError::InvalidTriple(s.to_string()));
        }

        Ok(Self(s.to_string()))
    }

    /// The triple as written
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// CPU architecture component
    pub fn cpu(&self) -> &str {
        self.0.split('-').next().unwrap_or(&self.0)
    }

    /// Node.js platform naming for this triple
    pub fn node_platform(&self) -> NodePlatform {
        NodePlatform::from_triple(self)
    }
}

impl fmt::Display for TargetTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TargetTriple {
    type Error = MatrixError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TargetTriple> for String {
    fn from(triple: TargetTriple) -> Self {
        triple.0
    }
}

impl std::str::FromStr for TargetTriple {
    type Err = MatrixError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Node.js `process.platform` / `process.arch` / ABI for a triple
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePlatform {
    /// `linux`, `darwin`, `win32`, `android`, `freebsd`, ...
    pub platform: String,
    /// `x64`, `arm64`, `ia32`, `arm`, ...
    pub arch: String,
    /// `gnu`, `musl`, `msvc`, `gnueabihf`, `eabi`, ...
    pub abi: Option<String>,
}

impl NodePlatform {
    /// Map a Rust triple onto Node naming
    pub fn from_triple(triple: &TargetTriple) -> Self {
        let raw = triple.as_str();
        if raw == "universal-apple-darwin" {
            return Self {
                platform: "darwin".to_string(),
                arch: "universal".to_string(),
                abi: None,
            };
        }

        // androideabi is written as one component in the triple
        let normalized = match raw.strip_suffix("androideabi") {
            Some(prefix) => format!("{}android-eabi", prefix),
            None => raw.to_string(),
        };
        let parts: Vec<&str> = normalized.split('-').collect();

        let (cpu, sys, abi) = match parts.as_slice() {
            [cpu, _vendor, sys, abi] => (*cpu, *sys, Some(*abi)),
            [cpu, "linux", "android"] => (*cpu, "android", None),
            [cpu, _vendor, sys] => (*cpu, *sys, None),
            [cpu, sys] => (*cpu, *sys, None),
            _ => (raw, raw, None),
        };

        let platform = match sys {
            "darwin" => "darwin",
            "windows" => "win32",
            "linux" => "linux",
            "android" => "android",
            "freebsd" => "freebsd",
            other => other,
        };

        let arch = match cpu {
            "x86_64" => "x64",
            "aarch64" => "arm64",
            "i686" => "ia32",
            "armv7" => "arm",
            "riscv64gc" => "riscv64",
            "powerpc64le" => "ppc64",
            other => other,
        };

        Self {
            platform: platform.to_string(),
            arch: arch.to_string(),
            abi: abi.map(str::to_string),
        }
    }

    /// `platform-arch[-abi]`, the suffix used in artifact file names
    pub fn suffix(&self) -> String {
        match &self.abi {
            Some(abi) => format!("{}-{}-{}", self.platform, self.arch, abi),
            None => format!("{}-{}", self.platform, self.arch),
        }
    }
}

/// Opaque identifier of one release run, used for provenance only
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReleaseId(String);

impl ReleaseId {
    /// Create a release identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier derived from a package version (`v1.2.3`)
    pub fn from_version(version: &str) -> Self {
        Self(format!("v{}", version.trim_start_matches('v')))
    }

    /// The identifier as written
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReleaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What started a release run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trigger {
    /// Operator passed an explicit identifier
    Manual { release: ReleaseId },
    /// CI event payload carried the identifier
    Event { release: ReleaseId, source: PathBuf },
    /// Identifier taken from the CI ref name
    Ref { release: ReleaseId },
}

impl Trigger {
    /// Resolve the trigger from, in order: an explicit identifier, an event
    /// payload file, `GITHUB_REF_NAME`.
    pub fn resolve(explicit: Option<&str>, event_path: Option<&Path>) -> Result<Option<Self>> {
        if let Some(id) = explicit.filter(|s| !s.trim().is_empty()) {
            return Ok(Some(Self::Manual {
                release: ReleaseId::new(id.trim()),
            }));
        }

        let explicit_event = event_path.is_some();
        let event_path = event_path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("GITHUB_EVENT_PATH").map(PathBuf::from));
        if let Some(path) = event_path {
            if path.exists() {
                let content = std::fs::read_to_string(&path)?;
                let event: serde_json::Value = serde_json::from_str(&content)?;
                if let Some(id) = release_from_event(&event) {
                    debug!(path = %path.display(), release = %id, "release id from event payload");
                    return Ok(Some(Self::Event {
                        release: ReleaseId::new(id),
                        source: path,
                    }));
                }
            } else if explicit_event {
                return Err(GantryError::other(format!(
                    "Event payload not found at {}",
                    path.display()
                )));
            }
        }

        if let Ok(ref_name) = std::env::var("GITHUB_REF_NAME") {
            if !ref_name.is_empty() {
                return Ok(Some(Self::Ref {
                    release: ReleaseId::new(ref_name),
                }));
            }
        }

        Ok(None)
    }

    /// The release identifier carried by this trigger
    pub fn release(&self) -> &ReleaseId {
        match self {
            Self::Manual { release } | Self::Event { release, .. } | Self::Ref { release } => {
                release
            }
        }
    }
}

/// Pull a release identifier out of a CI event document
fn release_from_event(event: &serde_json::Value) -> Option<String> {
    let candidates = [
        event.pointer("/release/tag_name"),
        event.pointer("/client_payload/release"),
        event.pointer("/inputs/release"),
    ];

    candidates
        .into_iter()
        .flatten()
        .filter_map(|v| v.as_str())
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}
