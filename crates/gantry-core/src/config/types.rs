//! Configuration types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Main configuration for Gantry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Version of the config schema
    #[serde(rename = "$schema", skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// Package layout
    pub package: PackageConfig,

    /// Build execution settings
    pub build: BuildConfig,

    /// Publishing configuration
    pub publish: PublishConfig,

    /// Target matrix; the built-in catalog is used when empty
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<TargetConfig>,
}

/// Package layout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageConfig {
    /// Path to the package manifest (package.json)
    pub manifest: PathBuf,

    /// Fixed identifier used in artifact file names (`<binary_name>.<platform>.node`)
    pub binary_name: String,

    /// Directory artifacts are written to, relative to the project root
    pub output_dir: PathBuf,
}

impl Default for PackageConfig {
    fn default() -> Self {
        Self {
            manifest: PathBuf::from("package.json"),
            binary_name: "cli".to_string(),
            output_dir: PathBuf::from("."),
        }
    }
}

/// Build execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Maximum number of targets building at once
    pub concurrency: usize,

    /// Per-target timeout in seconds
    pub timeout_secs: u64,

    /// Extra attempts for a failed target
    pub retries: u32,

    /// Container runtime binary for isolated targets
    pub container_runtime: String,

    /// Mount point of the project root inside containers
    pub container_workdir: String,

    /// Environment variables passed to every step
    pub env: HashMap<String, String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            timeout_secs: 3600,
            retries: 0,
            container_runtime: "docker".to_string(),
            container_workdir: "/build".to_string(),
            env: HashMap::new(),
        }
    }
}

/// What to do when some targets produced no artifact
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IncompletePolicy {
    /// Refuse to publish anything
    #[default]
    Abort,
    /// Publish the targets that did build
    PublishAvailable,
}

/// Publishing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Registry URL
    pub registry_url: String,

    /// Environment variable holding the registry token
    pub token_env: String,

    /// Dist-tag for both publishes
    pub tag: String,

    /// Dry run (publish into memory only)
    pub dry_run: bool,

    /// Policy for incomplete artifact sets
    pub on_incomplete: IncompletePolicy,

    /// Root of the local artifact transport
    pub artifacts_dir: PathBuf,

    /// Second package identity
    pub secondary: SecondaryConfig,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            registry_url: "https://registry.npmjs.org".to_string(),
            token_env: "NPM_TOKEN".to_string(),
            tag: "latest".to_string(),
            dry_run: false,
            on_incomplete: IncompletePolicy::Abort,
            artifacts_dir: PathBuf::from("artifacts"),
            secondary: SecondaryConfig::default(),
        }
    }
}

/// Secondary identity configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecondaryConfig {
    /// Whether the secondary publish runs; turning it off is explicit
    pub enabled: bool,

    /// Package name of the secondary identity
    pub name: Option<String>,

    /// Bin alias of the secondary package (defaults to `name`)
    pub bin_alias: Option<String>,

    /// Scripts that belong to the primary publish only
    pub reserved_hooks: Vec<String>,
}

impl Default for SecondaryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            name: None,
            bin_alias: None,
            reserved_hooks: vec!["prepublishOnly".to_string()],
        }
    }
}

/// One configured build target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Rust target triple
    pub triple: String,

    /// Container image; native host execution when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Provisioning steps
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub setup: Vec<String>,

    /// Build steps
    #[serde(default)]
    pub build: Vec<String>,

    /// Post-process (strip) steps
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub strip: Vec<String>,
}
