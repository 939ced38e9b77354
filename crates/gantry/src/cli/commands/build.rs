//! Build command

use clap::Args;
use tracing::info;

use crate::cli::commands::{build_failure, build_matrix, print_build_summary, Project};
use crate::cli::{output, Cli, OutputFormat};

/// Build every target of the matrix
#[derive(Debug, Args)]
pub struct BuildCommand {
    /// Build only these target triples (repeatable)
    #[arg(long, value_name = "TRIPLE")]
    pub only: Vec<String>,

    /// Upload built artifacts to the shared artifacts directory
    #[arg(long)]
    pub upload: bool,
}

impl BuildCommand {
    /// Execute the build command
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(self.execute_async(cli))
    }

    async fn execute_async(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(only = ?self.only, upload = self.upload, "executing build command");
        let project = Project::load()?;
        let matrix = project.restrict(&self.only)?;

        if cli.is_text() {
            output::info(&format!("Building {} target(s)", matrix.len()));
        }

        let (store, summary) = build_matrix(&project, matrix, cli).await;

        match cli.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
            OutputFormat::Text if !cli.quiet => print_build_summary(&summary),
            OutputFormat::Text => {}
        }

        if self.upload && !summary.was_cancelled() {
            let available = store.collect_available()?;
            let transport = project.transport();
            available.artifacts.upload_to(&transport).await?;
            info!(
                uploaded = available.artifacts.len(),
                root = %transport.root().display(),
                "artifacts uploaded"
            );
            if cli.is_text() {
                output::success(&format!(
                    "Uploaded {} artifact(s) to {}",
                    available.artifacts.len(),
                    output::path_style().apply_to(transport.root().display())
                ));
            }
        }

        match build_failure(&summary) {
            Some(failure) => Err(failure.into()),
            None => Ok(()),
        }
    }
}
