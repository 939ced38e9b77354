//! Package registry integrations
//!
//! - NPM: the public npm registry or any compatible mirror
//! - Memory: in-process registry for dry runs

pub mod memory;
pub mod npm;

pub use memory::MemoryRegistry;
pub use npm::{NpmConfig, NpmRegistry};
