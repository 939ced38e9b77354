//! Configuration validation

use std::collections::HashSet;

use tracing::debug;

use crate::error::{ConfigError, Result};
use crate::types::TargetTriple;

use super::types::Config;

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    debug!("validating configuration");
    validate_package(config)?;
    validate_build(config)?;
    validate_publish(config)?;
    validate_targets(config)?;
    debug!("configuration validation passed");
    Ok(())
}

fn invalid(field: impl Into<String>, message: impl Into<String>) -> crate::error::GantryError {
    ConfigError::InvalidValue {
        field: field.into(),
        message: message.into(),
    }
    .into()
}

fn validate_package(config: &Config) -> Result<()> {
    let name = &config.package.binary_name;
    if name.is_empty() {
        return Err(invalid("package.binary_name", "cannot be empty"));
    }

    if name.contains('/') || name.contains('\\') || name.contains('.') {
        return Err(invalid(
            "package.binary_name",
            "must be a plain file stem (no separators or dots)",
        ));
    }

    if config.package.manifest.as_os_str().is_empty() {
        return Err(invalid("package.manifest", "cannot be empty"));
    }

    Ok(())
}

fn validate_build(config: &Config) -> Result<()> {
    if config.build.concurrency == 0 {
        return Err(invalid("build.concurrency", "must be at least 1"));
    }

    if config.build.timeout_secs == 0 {
        return Err(invalid("build.timeout_secs", "must be at least 1"));
    }

    if config.build.container_runtime.is_empty() {
        return Err(invalid("build.container_runtime", "cannot be empty"));
    }

    if !config.build.container_workdir.starts_with('/') {
        return Err(invalid(
            "build.container_workdir",
            "must be an absolute path inside the container",
        ));
    }

    Ok(())
}

fn validate_publish(config: &Config) -> Result<()> {
    if config.publish.registry_url.is_empty() {
        return Err(invalid("publish.registry_url", "cannot be empty"));
    }

    if config.publish.tag.is_empty() {
        return Err(invalid("publish.tag", "cannot be empty"));
    }

    let secondary = &config.publish.secondary;
    if secondary.enabled {
        match secondary.name.as_deref() {
            None | Some("") => {
                return Err(invalid(
                    "publish.secondary.name",
                    "required unless publish.secondary.enabled = false",
                ));
            }
            _ => {}
        }

        if secondary.bin_alias.as_deref() == Some("") {
            return Err(invalid("publish.secondary.bin_alias", "cannot be empty"));
        }
    }

    Ok(())
}

fn validate_targets(config: &Config) -> Result<()> {
    if !config.targets.is_empty() {
        debug!(count = config.targets.len(), "validating targets");
    }

    let mut seen = HashSet::new();
    for (i, target) in config.targets.iter().enumerate() {
        let triple = TargetTriple::parse(&target.triple)
            .map_err(|e| invalid(format!("targets[{}].triple", i), e.to_string()))?;

        if !seen.insert(triple.clone()) {
            return Err(invalid(
                format!("targets[{}].triple", i),
                format!("'{}' is declared more than once", triple),
            ));
        }

        if target.build.iter().all(|step| step.trim().is_empty()) {
            return Err(invalid(
                format!("targets[{}].build", i),
                "at least one build step is required",
            ));
        }

        if target.image.as_deref() == Some("") {
            return Err(invalid(
                format!("targets[{}].image", i),
                "cannot be empty; omit it for native builds",
            ));
        }
    }

    Ok(())
}
