//! Registry sink trait

use crate::error::Result;
use crate::types::{PublishPayload, PublishReceipt};

/// Trait for package registries that accept publishes
///
/// The same sink is used for every publish stage of a release, so
/// implementations must not keep per-package state that would make a second
/// publish under a different name behave differently from the first.
#[async_trait::async_trait]
pub trait RegistrySink: Send + Sync {
    /// Get the registry name
    fn name(&self) -> &str;

    /// Check if the sink is configured well enough to attempt a publish
    fn is_available(&self) -> bool;

    /// Publish a package
    ///
    /// Returns a receipt on acceptance, `StoreError::Rejected` when the
    /// registry refuses the package.
    async fn publish(&self, payload: &PublishPayload) -> Result<PublishReceipt>;
}
