//! Release command

use clap::Args;
use tracing::info;

use crate::cli::commands::{
    build_matrix, collect, finish_publish, print_build_summary, publish_sink, run_publish,
    Project, TriggerArgs,
};
use crate::cli::{output, Cli, OutputFormat};
use crate::exit_codes::{self, Failure};

/// Build, collect and publish in one run
#[derive(Debug, Args)]
pub struct ReleaseCommand {
    #[command(flatten)]
    pub trigger: TriggerArgs,
}

impl ReleaseCommand {
    /// Execute the release command
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(self.execute_async(cli))
    }

    async fn execute_async(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(
            release = ?self.trigger.release,
            dry_run = self.trigger.dry_run,
            "executing release command"
        );
        let project = Project::load()?;
        // Everything publishing needs is checked before spending time on builds
        project.manifest()?.validate()?;
        project.secondary()?;
        let sink = publish_sink(&project.config, self.trigger.dry_run)?;

        if cli.is_text() {
            output::info(&format!("Building {} target(s)", project.matrix.len()));
        }
        let (store, summary) = build_matrix(&project, project.matrix.clone(), cli).await;

        if cli.format == OutputFormat::Text && !cli.quiet {
            print_build_summary(&summary);
        }

        if summary.was_cancelled() {
            return Err(Failure::new(exit_codes::CANCELLED, "release cancelled").into());
        }

        let (artifacts, matrix) = collect(
            &store,
            project.matrix.clone(),
            project.config.publish.on_incomplete,
            cli,
        )?;

        let report = run_publish(&project, matrix, &artifacts, &self.trigger, sink).await?;
        finish_publish(&report, cli)
    }
}
