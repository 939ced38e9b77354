//! CLI commands

mod build;
mod init;
mod matrix;
mod publish;
mod release;
mod validate;

pub use build::BuildCommand;
pub use init::InitCommand;
pub use matrix::MatrixCommand;
pub use publish::PublishCommand;
pub use release::ReleaseCommand;
pub use validate::ValidateCommand;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use console::style;
use tracing::{info, warn};

use gantry_core::config::{
    load_config_or_default, project_root, validate_config, Config, IncompletePolicy,
};
use gantry_core::error::ArtifactError;
use gantry_core::{
    ArtifactSet, ArtifactStore, LocalDirTransport, PackageManifest, PublishOptions,
    PublishPipeline, PublishReport, ReleaseId, ReleaseStatus, SecondaryIdentity, StageOutcome,
    TargetMatrix, TargetTriple, Trigger,
};
use gantry_stores::{MemoryRegistry, NpmConfig, NpmRegistry, RegistrySink};
use gantry_tasks::{
    cancel_pair, BuildExecutor, BuildOutcome, BuildReporter, BuildReporterRegistry, BuildSummary,
    ExecutorOptions, MatrixScheduler, SchedulerOptions,
};

use crate::cli::output::{self, ProgressReporter};
use crate::cli::{Cli, OutputFormat};
use crate::exit_codes::{self, Failure};

/// Release trigger and publish flags shared by `publish` and `release`
#[derive(Debug, Clone, Args)]
pub struct TriggerArgs {
    /// Release identifier (defaults to the CI event payload or ref name)
    #[arg(long)]
    pub release: Option<String>,

    /// CI event payload file (defaults to GITHUB_EVENT_PATH)
    #[arg(long)]
    pub event: Option<PathBuf>,

    /// Run the whole pipeline against an in-memory registry
    #[arg(long)]
    pub dry_run: bool,
}

/// Loaded configuration, matrix and project layout
pub(crate) struct Project {
    pub config: Config,
    pub config_path: Option<PathBuf>,
    pub root: PathBuf,
    pub matrix: Arc<TargetMatrix>,
}

impl Project {
    /// Load configuration from the working directory upward
    pub fn load() -> anyhow::Result<Self> {
        let cwd = std::env::current_dir()?;
        let (config, config_path) = load_config_or_default(&cwd)?;
        let root = project_root(config_path.as_deref(), &cwd);
        let matrix = Arc::new(TargetMatrix::from_config(&config).map_err(gantry_core::GantryError::from)?);

        info!(
            root = %root.display(),
            config = ?config_path,
            targets = matrix.len(),
            "project loaded"
        );

        Ok(Self {
            config,
            config_path,
            root,
            matrix,
        })
    }

    /// Path of the package manifest
    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(&self.config.package.manifest)
    }

    /// Load the package manifest
    pub fn manifest(&self) -> anyhow::Result<PackageManifest> {
        Ok(PackageManifest::load(&self.manifest_path())?)
    }

    /// Transport shared between build workers and the publish job
    pub fn transport(&self) -> LocalDirTransport {
        LocalDirTransport::new(self.root.join(&self.config.publish.artifacts_dir))
    }

    /// Directory artifacts are written to
    pub fn output_dir(&self) -> PathBuf {
        self.root.join(&self.config.package.output_dir)
    }

    /// Secondary identity for publishing. Errors when the secondary publish is
    /// on but unnamed, which only happens without a config file.
    pub fn secondary(&self) -> anyhow::Result<Option<SecondaryIdentity>> {
        validate_config(&self.config)?;
        Ok(SecondaryIdentity::from_config(&self.config.publish.secondary))
    }

    /// Parse `--only` triples against the matrix
    pub fn restrict(&self, only: &[String]) -> anyhow::Result<Arc<TargetMatrix>> {
        if only.is_empty() {
            return Ok(self.matrix.clone());
        }
        let triples = only
            .iter()
            .map(|s| TargetTriple::parse(s))
            .collect::<Result<Vec<_>, _>>()
            .map_err(gantry_core::GantryError::from)?;
        Ok(Arc::new(
            self.matrix
                .restrict(&triples)
                .map_err(gantry_core::GantryError::from)?,
        ))
    }
}

/// Build every target of `matrix` into a fresh store, with Ctrl-C cancelling
/// all in-flight targets
pub(crate) async fn build_matrix(
    project: &Project,
    matrix: Arc<TargetMatrix>,
    cli: &Cli,
) -> (Arc<ArtifactStore>, BuildSummary) {
    let mut registry = BuildReporterRegistry::new();
    if cli.is_text() {
        registry.register(ProgressReporter::new());
    }
    let reporter: Arc<dyn BuildReporter> = Arc::new(registry);

    let (cancel, signal) = cancel_pair();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling build");
            cancel.cancel();
        }
    });

    let options = ExecutorOptions::from_config(&project.config, &project.root);
    let executor = Arc::new(BuildExecutor::new(options, reporter.clone()).with_cancel(signal));
    let scheduler = MatrixScheduler::new(
        executor,
        SchedulerOptions {
            concurrency: project.config.build.concurrency,
            retries: project.config.build.retries,
        },
        reporter,
    );

    let store = Arc::new(ArtifactStore::new(matrix));
    let summary = scheduler.run(store.clone()).await;
    ctrl_c.abort();
    (store, summary)
}

/// Print one line per target
pub(crate) fn print_build_summary(summary: &BuildSummary) {
    println!();
    println!("{}", output::header("Build results"));
    for result in &summary.results {
        let triple = output::triple_style().apply_to(&result.triple);
        match &result.outcome {
            BuildOutcome::Success { artifact } => println!(
                "  {} {} {} ({:.1}s)",
                style("✓").green(),
                triple,
                output::path_style().apply_to(artifact.display()),
                result.duration.as_secs_f64()
            ),
            BuildOutcome::Failure { cause } => {
                println!("  {} {} {}: {}", style("✗").red(), triple, cause.kind(), cause);
                if let gantry_tasks::BuildFailure::StepFailed { stderr_tail, .. } = cause {
                    for line in stderr_tail.lines() {
                        println!("      {}", style(line).dim());
                    }
                }
            }
        }
    }
    println!();
    println!(
        "{}/{} targets built in {:.1}s",
        summary.succeeded(),
        summary.results.len(),
        summary.duration.as_secs_f64()
    );
}

/// Exit code for a finished build
pub(crate) fn build_failure(summary: &BuildSummary) -> Option<Failure> {
    if summary.was_cancelled() {
        Some(Failure::silent(exit_codes::CANCELLED))
    } else if !summary.is_success() {
        Some(Failure::silent(exit_codes::BUILD_FAILED))
    } else {
        None
    }
}

/// Collect artifacts under the configured incomplete policy. Returns the set
/// and the matrix the pipeline should validate against.
pub(crate) fn collect(
    store: &ArtifactStore,
    matrix: Arc<TargetMatrix>,
    policy: IncompletePolicy,
    cli: &Cli,
) -> anyhow::Result<(ArtifactSet, Arc<TargetMatrix>)> {
    match policy {
        IncompletePolicy::Abort => Ok((store.collect_all()?, matrix)),
        IncompletePolicy::PublishAvailable => {
            let partial = store.collect_available()?;
            if partial.is_complete() {
                return Ok((partial.artifacts, matrix));
            }
            if partial.artifacts.is_empty() {
                return Err(ArtifactError::Incomplete {
                    missing: partial.missing,
                }
                .into());
            }

            let missing: Vec<String> = partial.missing.iter().map(|t| t.to_string()).collect();
            warn!(missing = ?missing, "publishing without some targets");
            if cli.is_text() {
                output::warning(&format!(
                    "Publishing without artifacts for {}",
                    missing.join(", ")
                ));
            }

            let reduced = matrix
                .restrict(&partial.artifacts.triples())
                .map_err(gantry_core::GantryError::from)?;
            Ok((partial.artifacts, Arc::new(reduced)))
        }
    }
}

/// Registry sink for this run
pub(crate) fn registry_sink(config: &Config, dry_run: bool) -> anyhow::Result<Arc<dyn RegistrySink>> {
    if dry_run || config.publish.dry_run {
        info!("dry run, publishing into memory");
        return Ok(Arc::new(MemoryRegistry::new()));
    }

    let npm = NpmConfig::new()
        .with_registry_url(config.publish.registry_url.clone())
        .with_token_env(config.publish.token_env.clone());
    Ok(Arc::new(
        NpmRegistry::new(npm).context("failed to set up the npm registry")?,
    ))
}

/// Registry sink that can publish, checked before any work starts
pub(crate) fn publish_sink(config: &Config, dry_run: bool) -> anyhow::Result<Arc<dyn RegistrySink>> {
    let sink = registry_sink(config, dry_run)?;
    if !sink.is_available() {
        return Err(Failure::new(
            exit_codes::CONFIG_ERROR,
            format!(
                "No {} token found (set {} or add one to ~/.npmrc)",
                sink.name(),
                config.publish.token_env
            ),
        )
        .into());
    }
    Ok(sink)
}

/// Run the publish pipeline
pub(crate) async fn run_publish(
    project: &Project,
    matrix: Arc<TargetMatrix>,
    artifacts: &ArtifactSet,
    trigger: &TriggerArgs,
    sink: Arc<dyn RegistrySink>,
) -> anyhow::Result<PublishReport> {
    let manifest = project.manifest()?;
    let release = Trigger::resolve(trigger.release.as_deref(), trigger.event.as_deref())?
        .map(|t| t.release().clone())
        .unwrap_or_else(|| ReleaseId::from_version(&manifest.version));
    info!(release = %release, "resolved release");

    let mut options = PublishOptions::default()
        .with_tag(project.config.publish.tag.clone())
        .with_project_root(project.root.clone())
        .with_release(release);
    if let Some(identity) = project.secondary()? {
        options = options.with_secondary(identity);
    }

    let pipeline = PublishPipeline::new(matrix, sink, options);
    Ok(pipeline.publish(&manifest, artifacts).await?)
}

/// Print a publish report and map its status to an exit code
pub(crate) fn finish_publish(report: &PublishReport, cli: &Cli) -> anyhow::Result<()> {
    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Text if !cli.quiet => print_publish_report(report),
        OutputFormat::Text => {}
    }

    match report.status {
        ReleaseStatus::Complete => Ok(()),
        ReleaseStatus::PrimaryOnly | ReleaseStatus::PrimaryFailed => {
            Err(Failure::silent(exit_codes::PUBLISH_FAILED).into())
        }
    }
}

fn print_publish_report(report: &PublishReport) {
    println!();
    println!("{}", output::header("Publish results"));
    if let Some(release) = &report.release {
        println!("{}", output::key_value("Release", release.as_str()));
    }
    println!(
        "{}",
        output::key_value("Targets", &report.targets.len().to_string())
    );
    print_stage("Primary", &report.primary);
    print_stage("Secondary", &report.secondary);
    println!();

    match report.status {
        ReleaseStatus::Complete => output::success("Release published"),
        ReleaseStatus::PrimaryOnly => {
            output::warning("Primary package published, secondary publish failed")
        }
        ReleaseStatus::PrimaryFailed => output::error("Nothing was published"),
    }
}

fn print_stage(label: &str, outcome: &StageOutcome) {
    let line = match outcome {
        StageOutcome::Published { receipt } => format!(
            "{} {}@{} ({})",
            style("✓").green(),
            output::package_style().apply_to(&receipt.name),
            receipt.version,
            receipt.tag
        ),
        StageOutcome::Failed { package, error, .. } => {
            format!("{} {}: {}", style("✗").red(), package, error)
        }
        StageOutcome::Skipped => style("skipped").dim().to_string(),
        StageOutcome::NotAttempted => style("not attempted").yellow().to_string(),
    };
    println!("{}", output::key_value(label, &line));
}
