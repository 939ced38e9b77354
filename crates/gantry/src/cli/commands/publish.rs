//! Publish command

use std::sync::Arc;

use clap::Args;
use tracing::info;

use gantry_core::ArtifactStore;

use crate::cli::commands::{
    collect, finish_publish, publish_sink, run_publish, Project, TriggerArgs,
};
use crate::cli::{output, Cli};

/// Publish collected artifacts under both package identities
#[derive(Debug, Args)]
pub struct PublishCommand {
    #[command(flatten)]
    pub trigger: TriggerArgs,
}

impl PublishCommand {
    /// Execute the publish command
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(self.execute_async(cli))
    }

    async fn execute_async(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(
            release = ?self.trigger.release,
            dry_run = self.trigger.dry_run,
            "executing publish command"
        );
        let project = Project::load()?;
        project.secondary()?;
        let sink = publish_sink(&project.config, self.trigger.dry_run)?;

        let store = ArtifactStore::new(project.matrix.clone());
        let transport = project.transport();
        let hydrated = store.hydrate(&transport, &project.output_dir()).await?;
        info!(hydrated, root = %transport.root().display(), "artifacts downloaded");

        let (artifacts, matrix) = collect(
            &store,
            Arc::clone(&project.matrix),
            project.config.publish.on_incomplete,
            cli,
        )?;

        if cli.is_text() {
            output::info(&format!(
                "Collected {}/{} artifact(s) ({}) from {}",
                artifacts.len(),
                project.matrix.len(),
                output::format_size(artifacts.total_size()),
                output::path_style().apply_to(transport.root().display())
            ));
        }

        let report = run_publish(&project, matrix, &artifacts, &self.trigger, sink).await?;
        finish_publish(&report, cli)
    }
}
