//! Validate command

use clap::Args;
use console::style;
use tracing::info;

use gantry_core::config::validate_config;
use gantry_core::manifest::PUBLISH_LIFECYCLE;
use gantry_core::{EnvironmentSpec, PackageManifest, SecondaryIdentity};

use crate::cli::commands::{registry_sink, Project};
use crate::cli::{Cli, OutputFormat};
use crate::exit_codes::{self, Failure};

/// Validate configuration, target matrix and package manifest
#[derive(Debug, Args)]
pub struct ValidateCommand {
    /// Only validate configuration file
    #[arg(long)]
    pub config_only: bool,

    /// Strict mode - treat warnings as errors
    #[arg(long)]
    pub strict: bool,
}

impl ValidateCommand {
    /// Execute the validate command
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(
            config_only = self.config_only,
            strict = self.strict,
            "executing validate command"
        );

        let mut errors: Vec<String> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();
        let mut hooks = serde_json::Value::Null;

        let project = match Project::load() {
            Ok(project) => Some(project),
            Err(e) => {
                errors.push(format!("Configuration: {}", e));
                None
            }
        };

        if let Some(ref project) = project {
            if project.config_path.is_none() {
                warnings.push("No configuration file found, using defaults".to_string());
                if let Err(e) = validate_config(&project.config) {
                    errors.push(format!("Configuration: {}", e));
                }
            }
            check_secondary_config(project, &mut warnings);

            if !self.config_only {
                check_environment(project, &mut warnings);
                check_registry(project, &mut warnings);

                match project.manifest() {
                    Ok(manifest) => {
                        hooks = publish_hooks(project, &manifest);
                        check_manifest(project, &manifest, &mut errors, &mut warnings);
                    }
                    Err(e) => errors.push(format!("Package manifest: {}", e)),
                }
            }
        }

        if self.strict {
            errors.append(&mut warnings);
        }

        let passed = errors.is_empty();
        let config_path = project.as_ref().and_then(|p| p.config_path.clone());

        match cli.format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "valid": passed,
                    "config_path": config_path.map(|p| p.to_string_lossy().to_string()),
                    "targets": project.as_ref().map(|p| p.matrix.len()),
                    "publish_hooks": hooks,
                    "errors": errors,
                    "warnings": warnings
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Text => {
                if !cli.quiet {
                    println!("{}", style("Validation Results").bold());
                    println!();

                    if let Some(path) = config_path {
                        println!("Config: {}", style(path.display()).cyan());
                        println!();
                    }

                    if cli.verbose {
                        print_hooks(&hooks);
                    }

                    if !errors.is_empty() {
                        println!("{}", style("Errors:").red().bold());
                        for error in &errors {
                            println!("  {} {}", style("✗").red(), error);
                        }
                        println!();
                    }

                    if !warnings.is_empty() {
                        println!("{}", style("Warnings:").yellow().bold());
                        for warning in &warnings {
                            println!("  {} {}", style("!").yellow(), warning);
                        }
                        println!();
                    }

                    if passed {
                        if warnings.is_empty() {
                            println!("{}", style("✓ All checks passed").green().bold());
                        } else {
                            println!(
                                "{} with {} warning(s)",
                                style("✓ Validation passed").green().bold(),
                                warnings.len()
                            );
                        }
                    } else {
                        println!(
                            "{} with {} error(s)",
                            style("✗ Validation failed").red().bold(),
                            errors.len()
                        );
                    }
                }
            }
        }

        if !passed {
            return Err(Failure::silent(exit_codes::VALIDATION_ERROR).into());
        }

        Ok(())
    }
}

fn check_environment(project: &Project, warnings: &mut Vec<String>) {
    let runtime = &project.config.build.container_runtime;
    let needs_runtime = project
        .matrix
        .targets()
        .iter()
        .any(|t| matches!(t.environment, EnvironmentSpec::Isolated { .. }));

    if needs_runtime && which::which(runtime).is_err() {
        warnings.push(format!(
            "Container runtime '{}' not found on PATH; isolated targets will fail",
            runtime
        ));
    }
}

fn check_secondary_config(project: &Project, warnings: &mut Vec<String>) {
    let secondary = &project.config.publish.secondary;
    if !secondary.enabled {
        warnings.push(
            "Secondary publish is disabled; only the primary package will be published".to_string(),
        );
        return;
    }

    for hook in &secondary.reserved_hooks {
        if !PUBLISH_LIFECYCLE.contains(&hook.as_str()) {
            warnings.push(format!(
                "Reserved hook '{}' is not an npm publish lifecycle script",
                hook
            ));
        }
    }
}

fn check_registry(project: &Project, warnings: &mut Vec<String>) {
    match registry_sink(&project.config, false) {
        Ok(sink) if !sink.is_available() => warnings.push(format!(
            "No {} token found in {} or ~/.npmrc; publishing will fail",
            sink.name(),
            project.config.publish.token_env
        )),
        Ok(_) => {}
        Err(e) => warnings.push(format!("Registry: {:#}", e)),
    }
}

/// Publish lifecycle scripts each package runs
fn publish_hooks(project: &Project, manifest: &PackageManifest) -> serde_json::Value {
    let names = |m: &PackageManifest| -> Vec<String> {
        m.publish_hooks()
            .into_iter()
            .map(|(name, _)| name.to_string())
            .collect()
    };

    let secondary = SecondaryIdentity::from_config(&project.config.publish.secondary)
        .and_then(|identity| manifest.derive_secondary(&identity).ok())
        .map(|derived| names(&derived));

    serde_json::json!({
        "primary": names(manifest),
        "secondary": secondary,
    })
}

fn print_hooks(hooks: &serde_json::Value) {
    let list = |key: &str| -> Option<String> {
        hooks[key].as_array().map(|names| {
            let names: Vec<&str> = names.iter().filter_map(|n| n.as_str()).collect();
            if names.is_empty() {
                "none".to_string()
            } else {
                names.join(", ")
            }
        })
    };

    if let Some(primary) = list("primary") {
        println!("Primary publish hooks: {}", primary);
    }
    if let Some(secondary) = list("secondary") {
        println!("Secondary publish hooks: {}", secondary);
    }
    if hooks.is_object() {
        println!();
    }
}

fn check_manifest(
    project: &Project,
    manifest: &PackageManifest,
    errors: &mut Vec<String>,
    warnings: &mut Vec<String>,
) {
    if let Err(e) = manifest.validate() {
        errors.push(format!("Package manifest: {}", e));
        return;
    }

    for path in manifest.bin_entries().values() {
        if !project.root.join(path).exists() {
            errors.push(format!("Entry point '{}' does not exist", path));
        }
    }

    if let Some(identity) = SecondaryIdentity::from_config(&project.config.publish.secondary) {
        if identity.name == manifest.name {
            errors.push(format!(
                "Secondary package name '{}' must differ from the primary",
                identity.name
            ));
        }
    }

    let napi_name = manifest
        .napi
        .as_ref()
        .and_then(|n| n.get("binaryName").or_else(|| n.get("name")))
        .and_then(|n| n.as_str());
    if let Some(napi_name) = napi_name {
        if napi_name != project.config.package.binary_name {
            warnings.push(format!(
                "package.binary_name '{}' differs from the napi name '{}' in package.json",
                project.config.package.binary_name, napi_name
            ));
        }
    }
}
