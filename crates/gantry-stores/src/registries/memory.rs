//! In-process registry
//!
//! Accepts publishes into memory. Used for `--dry-run` releases, where the
//! full pipeline runs but nothing leaves the machine, and for verifying
//! publish ordering.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use crate::error::{Result, StoreError};
use crate::traits::RegistrySink;
use crate::types::{integrity, PublishPayload, PublishReceipt};

/// A publish recorded by [`MemoryRegistry`]
#[derive(Debug, Clone)]
pub struct RecordedPublish {
    /// The payload as received
    pub payload: PublishPayload,
    /// Whether it was accepted
    pub accepted: bool,
}

/// Registry that keeps everything in memory
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    /// Every publish call, accepted or not, in call order
    calls: Mutex<Vec<RecordedPublish>>,
    /// name@version pairs already accepted
    published: Mutex<HashSet<(String, String)>>,
    /// Package names that are refused with a status and message
    rejections: HashMap<String, (u16, String)>,
}

impl MemoryRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse every publish of `name`
    pub fn reject(mut self, name: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        self.rejections.insert(name.into(), (status, message.into()));
        self
    }

    /// All publish attempts in call order
    pub fn calls(&self) -> Vec<RecordedPublish> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Number of publish attempts for a package name
    pub fn calls_for(&self, name: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.payload.name == name)
            .count()
    }

    /// Accepted payloads in publish order
    pub fn accepted(&self) -> Vec<PublishPayload> {
        self.calls()
            .into_iter()
            .filter(|c| c.accepted)
            .map(|c| c.payload)
            .collect()
    }

    fn record(&self, payload: &PublishPayload, accepted: bool) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedPublish {
                payload: payload.clone(),
                accepted,
            });
        }
    }
}

#[async_trait]
impl RegistrySink for MemoryRegistry {
    fn name(&self) -> &str {
        "memory"
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn publish(&self, payload: &PublishPayload) -> Result<PublishReceipt> {
        let tarball = match payload.tarball() {
            Ok(t) => t,
            Err(e) => {
                self.record(payload, false);
                return Err(e);
            }
        };

        if let Some((status, message)) = self.rejections.get(&payload.name) {
            self.record(payload, false);
            return Err(StoreError::Rejected {
                status: *status,
                message: message.clone(),
            });
        }

        let key = (payload.name.clone(), payload.version.clone());
        let fresh = self
            .published
            .lock()
            .map_err(|_| StoreError::Other("memory registry poisoned".to_string()))?
            .insert(key);
        if !fresh {
            self.record(payload, false);
            return Err(StoreError::Rejected {
                status: 403,
                message: format!(
                    "cannot publish over previously published version {}@{}",
                    payload.name, payload.version
                ),
            });
        }

        self.record(payload, true);
        info!(
            package = %payload.name,
            version = %payload.version,
            files = payload.files.len(),
            "accepted package into memory registry"
        );

        Ok(PublishReceipt {
            registry: "memory".to_string(),
            name: payload.name.clone(),
            version: payload.version.clone(),
            tag: payload.tag.clone(),
            files: payload.file_names(),
            integrity: integrity(&tarball),
            console_url: None,
            published_at: Utc::now(),
        })
    }
}
