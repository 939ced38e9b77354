//! package.json handling for the published addon

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::SecondaryConfig;
use crate::error::{ManifestError, Result};

/// npm lifecycle scripts that run during `npm publish`, in execution order
pub const PUBLISH_LIFECYCLE: &[&str] = &[
    "prepublishOnly",
    "prepack",
    "prepare",
    "postpack",
    "publish",
    "postpublish",
];

/// `bin` as written in package.json: a single path or an alias map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BinField {
    /// `"bin": "bin/cli.js"`, exposed under the unscoped package name
    Single(String),
    /// `"bin": { "alias": "bin/cli.js" }`
    Map(BTreeMap<String, String>),
}

/// package.json structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    /// Package name
    pub name: String,

    /// Package version
    pub version: String,

    /// Package description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Main entry point
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main: Option<String>,

    /// Executables
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bin: Option<BinField>,

    /// Scripts
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub scripts: BTreeMap<String, String>,

    /// Files to include in package
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<String>>,

    /// napi-rs build metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub napi: Option<serde_json::Value>,

    /// Preserve other fields
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

/// Name and executable alias of the second published package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecondaryIdentity {
    /// Package name
    pub name: String,
    /// Bin alias pointing at the primary entry point
    pub bin_alias: String,
    /// Scripts dropped from the derived manifest
    pub reserved_hooks: Vec<String>,
}

impl SecondaryIdentity {
    /// Identity with the default alias (the unscoped name) and reserved hooks
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            bin_alias: unscoped(&name).to_string(),
            name,
            reserved_hooks: vec!["prepublishOnly".to_string()],
        }
    }

    /// Override the bin alias
    pub fn with_bin_alias(mut self, alias: impl Into<String>) -> Self {
        self.bin_alias = alias.into();
        self
    }

    /// Replace the reserved hooks
    pub fn with_reserved_hooks(mut self, hooks: Vec<String>) -> Self {
        self.reserved_hooks = hooks;
        self
    }

    /// Identity from configuration; `None` when the secondary publish is off
    pub fn from_config(config: &SecondaryConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        let name = config.name.as_deref().filter(|n| !n.is_empty())?;
        let mut identity = Self::new(name).with_reserved_hooks(config.reserved_hooks.clone());
        if let Some(alias) = config.bin_alias.as_deref().filter(|a| !a.is_empty()) {
            identity = identity.with_bin_alias(alias);
        }
        Some(identity)
    }
}

fn unscoped(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

impl PackageManifest {
    /// Load package.json from path
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| ManifestError::NotFound(path.to_path_buf()))?;

        serde_json::from_str(&content).map_err(|e| ManifestError::ParseError(e.to_string()).into())
    }

    /// Manifest as a JSON document
    pub fn to_value(&self) -> Result<serde_json::Value> {
        serde_json::to_value(self).map_err(|e| ManifestError::WriteError(e.to_string()).into())
    }

    /// Bin entries as an alias map, normalizing the single-path form
    pub fn bin_entries(&self) -> BTreeMap<String, String> {
        match &self.bin {
            Some(BinField::Single(path)) => {
                BTreeMap::from([(unscoped(&self.name).to_string(), path.clone())])
            }
            Some(BinField::Map(map)) => map.clone(),
            None => BTreeMap::new(),
        }
    }

    /// Entry point the secondary alias points at: the bin named after the
    /// package, else the first bin in alias order
    pub fn primary_entry_point(&self) -> Option<String> {
        let entries = self.bin_entries();
        entries
            .get(unscoped(&self.name))
            .or_else(|| entries.values().next())
            .cloned()
    }

    /// Scripts that run during publish, in lifecycle order
    pub fn publish_hooks(&self) -> Vec<(&str, &str)> {
        PUBLISH_LIFECYCLE
            .iter()
            .filter_map(|hook| {
                self.scripts
                    .get_key_value(*hook)
                    .map(|(k, v)| (k.as_str(), v.as_str()))
            })
            .collect()
    }

    /// Check the manifest is publishable
    pub fn validate(&self) -> std::result::Result<(), ManifestError> {
        if self.name.trim().is_empty() {
            return Err(ManifestError::Invalid("name cannot be empty".to_string()));
        }

        semver::Version::parse(&self.version).map_err(|e| {
            ManifestError::Invalid(format!("version '{}' is not semver: {}", self.version, e))
        })?;

        let entries = self.bin_entries();
        if entries.is_empty() {
            return Err(ManifestError::Invalid(
                "at least one bin entry is required".to_string(),
            ));
        }

        if let Some((alias, _)) = entries
            .iter()
            .find(|(alias, path)| alias.is_empty() || path.trim().is_empty())
        {
            return Err(ManifestError::Invalid(format!(
                "bin entry '{}' has an empty alias or path",
                alias
            )));
        }

        Ok(())
    }

    /// Copy the manifest and apply a transform; `self` is left untouched
    pub fn derive(&self, transform: impl FnOnce(&mut PackageManifest)) -> PackageManifest {
        let mut derived = self.clone();
        transform(&mut derived);
        derived
    }

    /// Manifest of the second package identity: renamed, with a single bin
    /// alias pointing at the primary entry point and reserved hooks removed
    pub fn derive_secondary(
        &self,
        identity: &SecondaryIdentity,
    ) -> std::result::Result<PackageManifest, ManifestError> {
        let entry = self.primary_entry_point().ok_or_else(|| {
            ManifestError::Invalid("primary manifest has no bin entry point".to_string())
        })?;

        Ok(self.derive(|m| {
            m.name = identity.name.clone();
            m.bin = Some(BinField::Map(BTreeMap::from([(
                identity.bin_alias.clone(),
                entry,
            )])));
            m.scripts
                .retain(|name, _| !identity.reserved_hooks.iter().any(|h| h == name));
        }))
    }
}
