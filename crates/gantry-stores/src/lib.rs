//! Package registry publish sinks for Gantry
//!
//! This crate provides the registry side of a release: a [`RegistrySink`]
//! receives a fully assembled [`PublishPayload`] (manifest plus files) and
//! publishes it under the payload's package name.
//!
//! ## Supported Registries
//!
//! - **NPM**: the npm registry HTTP API, token authenticated
//! - **Memory**: an in-process registry used for dry runs and verification
//!
//! ## Usage
//!
//! ```ignore
//! use gantry_stores::{NpmConfig, NpmRegistry, RegistrySink};
//!
//! let registry = NpmRegistry::new(NpmConfig::default())?;
//! let receipt = registry.publish(&payload).await?;
//! ```

pub mod error;
pub mod registries;
pub mod traits;
pub mod types;

pub use error::StoreError;
pub use traits::RegistrySink;
pub use types::*;

pub use registries::{MemoryRegistry, NpmConfig, NpmRegistry};
