//! NPM Registry integration
//!
//! Publishes assembled packages through the npm registry HTTP API.
//!
//! ## Authentication
//!
//! Authentication is handled via NPM token, checked in this order:
//! 1. Token set explicitly on [`NpmConfig`]
//! 2. The configured token environment variable (default `NPM_TOKEN`)
//! 3. Token from ~/.npmrc matching the registry host

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, instrument};

use crate::error::{Result, StoreError};
use crate::traits::RegistrySink;
use crate::types::{integrity, PublishPayload, PublishReceipt};

/// NPM Registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NpmConfig {
    /// Registry URL (default: https://registry.npmjs.org)
    pub registry_url: String,
    /// NPM authentication token
    pub token: Option<String>,
    /// Environment variable the token is read from
    pub token_env: String,
}

impl Default for NpmConfig {
    fn default() -> Self {
        Self {
            registry_url: "https://registry.npmjs.org".to_string(),
            token: None,
            token_env: "NPM_TOKEN".to_string(),
        }
    }
}

impl NpmConfig {
    /// Create new NPM config with default registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Set registry URL
    pub fn with_registry_url(mut self, url: impl Into<String>) -> Self {
        self.registry_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set authentication token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set the environment variable the token is read from
    pub fn with_token_env(mut self, var: impl Into<String>) -> Self {
        self.token_env = var.into();
        self
    }

    /// Registry host and path as written in .npmrc (`//registry.npmjs.org/`)
    fn npmrc_key(&self) -> String {
        let without_scheme = self
            .registry_url
            .trim_start_matches("https:")
            .trim_start_matches("http:");
        format!("{}/:_authToken=", without_scheme.trim_end_matches('/'))
    }
}

/// NPM Registry adapter
pub struct NpmRegistry {
    config: NpmConfig,
    client: Client,
}

impl NpmRegistry {
    /// Create a new NPM Registry client
    pub fn new(mut config: NpmConfig) -> Result<Self> {
        if config.token.is_none() {
            config.token = Self::load_token(&config);
        }

        Ok(Self {
            config,
            client: Client::new(),
        })
    }

    /// Load NPM token from environment or .npmrc
    fn load_token(config: &NpmConfig) -> Option<String> {
        if let Ok(token) = std::env::var(&config.token_env) {
            if !token.is_empty() {
                debug!(var = %config.token_env, "Loaded NPM token from environment");
                return Some(token);
            }
        }

        let npmrc_path = dirs::home_dir()?.join(".npmrc");
        let content = std::fs::read_to_string(npmrc_path).ok()?;
        let key = config.npmrc_key();
        for line in content.lines() {
            let line = line.trim();
            if let Some(token) = line.strip_prefix(key.as_str()) {
                let token = token.trim();
                if !token.is_empty() {
                    debug!("Loaded NPM token from ~/.npmrc");
                    return Some(token.to_string());
                }
            }
        }

        debug!("No NPM token found in environment or ~/.npmrc");
        None
    }

    /// URL of the package document (`/@scope%2fname` for scoped packages)
    fn package_url(&self, name: &str) -> String {
        format!(
            "{}/{}",
            self.config.registry_url.trim_end_matches('/'),
            name.replace('/', "%2f")
        )
    }

    /// Build the registry publish document for a payload
    fn publish_document(&self, payload: &PublishPayload, tarball: &[u8]) -> serde_json::Value {
        let filename = format!(
            "{}-{}.tgz",
            payload.name.rsplit('/').next().unwrap_or(&payload.name),
            payload.version
        );
        let tarball_url = format!(
            "{}/-/{}",
            self.package_url(&payload.name),
            filename
        );

        let mut version_doc = payload.manifest.clone();
        if let Some(doc) = version_doc.as_object_mut() {
            doc.insert(
                "dist".to_string(),
                serde_json::json!({
                    "integrity": integrity(tarball),
                    "tarball": tarball_url,
                    "fileCount": payload.files.len() + 1,
                    "unpackedSize": payload.unpacked_size(),
                }),
            );
        }

        let mut attachments = HashMap::new();
        attachments.insert(
            filename,
            serde_json::json!({
                "content_type": "application/octet-stream",
                "data": BASE64.encode(tarball),
                "length": tarball.len()
            }),
        );

        serde_json::json!({
            "_id": payload.name,
            "name": payload.name,
            "description": payload.manifest.get("description"),
            "versions": {
                &payload.version: version_doc
            },
            "_attachments": attachments,
            "dist-tags": {
                &payload.tag: payload.version
            }
        })
    }
}

#[async_trait]
impl RegistrySink for NpmRegistry {
    fn name(&self) -> &str {
        "NPM"
    }

    fn is_available(&self) -> bool {
        self.config.token.is_some()
    }

    #[instrument(skip(self, payload), fields(registry = "NPM", package = %payload.name, version = %payload.version))]
    async fn publish(&self, payload: &PublishPayload) -> Result<PublishReceipt> {
        let token = self.config.token.as_ref().ok_or_else(|| {
            StoreError::AuthenticationFailed(format!(
                "No NPM token configured (set {})",
                self.config.token_env
            ))
        })?;

        let tarball = payload.tarball()?;
        let document = self.publish_document(payload, &tarball);
        let url = self.package_url(&payload.name);

        info!(
            "Publishing {} version {} ({} files, {} bytes) to {}",
            payload.name,
            payload.version,
            payload.files.len() + 1,
            tarball.len(),
            self.config.registry_url
        );

        let response = self
            .client
            .put(&url)
            .header("Authorization", format!("Bearer {}", token))
            .header("Content-Type", "application/json")
            .json(&document)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(StoreError::Rejected {
                status: status.as_u16(),
                message: registry_error_message(&error_text),
            });
        }

        debug!(status = status.as_u16(), "registry accepted package");

        Ok(PublishReceipt {
            registry: self.config.registry_url.clone(),
            name: payload.name.clone(),
            version: payload.version.clone(),
            tag: payload.tag.clone(),
            files: payload.file_names(),
            integrity: integrity(&tarball),
            console_url: Some(format!("https://www.npmjs.com/package/{}", payload.name)),
            published_at: Utc::now(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct RegistryErrorBody {
    error: Option<String>,
}

/// Extract the human readable part of a registry error body
pub fn registry_error_message(body: &str) -> String {
    serde_json::from_str::<RegistryErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .unwrap_or_else(|| body.trim().to_string())
}
