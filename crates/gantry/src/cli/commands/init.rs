//! Init command

use std::path::PathBuf;

use clap::Args;
use tracing::info;

use gantry_core::config::defaults::{DEFAULT_CONFIG_TEMPLATE, DEFAULT_CONFIG_TOML};

use crate::cli::output;
use crate::cli::{Cli, OutputFormat};
use crate::exit_codes::{self, Failure};

/// Write a default Gantry configuration
#[derive(Debug, Args)]
pub struct InitCommand {
    /// Force overwrite existing configuration
    #[arg(short, long)]
    pub force: bool,

    /// Output file path
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl InitCommand {
    /// Execute the init command
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(force = self.force, "executing init command");
        let cwd = std::env::current_dir()?;
        let config_path = self
            .output
            .clone()
            .unwrap_or_else(|| cwd.join(DEFAULT_CONFIG_TOML));

        if config_path.exists() && !self.force {
            return Err(Failure::new(
                exit_codes::CONFIG_ERROR,
                format!(
                    "Configuration file already exists at {}. Use --force to overwrite.",
                    config_path.display()
                ),
            )
            .into());
        }

        std::fs::write(&config_path, DEFAULT_CONFIG_TEMPLATE)?;
        info!(path = %config_path.display(), "configuration written");

        match cli.format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "path": config_path.to_string_lossy(),
                    "created": true,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Text => {
                if !cli.quiet {
                    output::success(&format!(
                        "Created {}",
                        output::path_style().apply_to(config_path.display())
                    ));
                    output::info("Edit [package] binary_name to match the napi name in package.json");
                }
            }
        }

        Ok(())
    }
}
