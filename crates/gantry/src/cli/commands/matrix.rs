//! Matrix command

use clap::Args;
use console::style;
use tracing::info;

use crate::cli::commands::Project;
use crate::cli::output;
use crate::cli::{Cli, OutputFormat};

/// List the target matrix
#[derive(Debug, Args)]
pub struct MatrixCommand {
    /// Print target triples only, one per line
    #[arg(long)]
    pub triples: bool,
}

impl MatrixCommand {
    /// Execute the matrix command
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(triples = self.triples, "executing matrix command");
        let project = Project::load()?;
        let binary_name = &project.config.package.binary_name;

        if self.triples {
            for triple in project.matrix.triples() {
                println!("{}", triple);
            }
            return Ok(());
        }

        match cli.format {
            OutputFormat::Json => {
                let targets: Vec<serde_json::Value> = project
                    .matrix
                    .targets()
                    .iter()
                    .map(|t| {
                        serde_json::json!({
                            "triple": t.triple,
                            "platform": t.triple.node_platform().suffix(),
                            "environment": t.environment,
                            "artifact": t.artifact_name(binary_name),
                            "setup": t.setup,
                            "build": t.build,
                            "strip": t.strip,
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&targets)?);
            }
            OutputFormat::Text => {
                if cli.quiet {
                    return Ok(());
                }
                let source = if project.config.targets.is_empty() {
                    "built-in catalog"
                } else {
                    "configuration"
                };
                println!(
                    "{} ({} targets, {})",
                    output::header("Target matrix"),
                    project.matrix.len(),
                    source
                );
                println!();
                for target in project.matrix.targets() {
                    println!(
                        "  {:<34} {:<28} {}",
                        output::triple_style().apply_to(&target.triple),
                        target.artifact_name(binary_name),
                        style(target.environment.label()).dim()
                    );
                    if cli.verbose {
                        for step in target.setup.iter().chain(&target.build).chain(&target.strip) {
                            println!("      {}", style(step).dim());
                        }
                    }
                }
            }
        }

        Ok(())
    }
}
