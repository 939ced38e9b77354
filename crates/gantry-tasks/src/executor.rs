//! Build executor - runs one target's steps and checks its artifact

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use gantry_core::config::Config;
use gantry_core::TargetDescriptor;
use tracing::{debug, instrument};

use crate::cancel::CancelSignal;
use crate::environment::ExecutionEnvironment;
use crate::reporter::{BuildEvent, BuildReporter};
use crate::result::{BuildFailure, BuildPhase, BuildResult};

/// Lines of stderr kept in a step failure
const STDERR_TAIL_LINES: usize = 20;

/// Host-side settings shared by every target
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Project root; native steps run here and containers mount it
    pub root_dir: PathBuf,
    /// Artifact directory, relative to the root
    pub output_dir: PathBuf,
    /// Fixed identifier in artifact names
    pub binary_name: String,
    /// Container runtime binary
    pub container_runtime: String,
    /// Mount point of the root inside containers
    pub container_workdir: String,
    /// Extra environment for every step
    pub env: BTreeMap<String, String>,
    /// Per-target time limit
    pub timeout: Duration,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            root_dir: std::env::current_dir().unwrap_or_default(),
            output_dir: PathBuf::from("."),
            binary_name: "cli".to_string(),
            container_runtime: "docker".to_string(),
            container_workdir: "/build".to_string(),
            env: BTreeMap::new(),
            timeout: Duration::from_secs(3600),
        }
    }
}

impl ExecutorOptions {
    /// Options from configuration, rooted at `root_dir`
    pub fn from_config(config: &Config, root_dir: &Path) -> Self {
        Self {
            root_dir: root_dir.to_path_buf(),
            output_dir: config.package.output_dir.clone(),
            binary_name: config.package.binary_name.clone(),
            container_runtime: config.build.container_runtime.clone(),
            container_workdir: config.build.container_workdir.clone(),
            env: config
                .build
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            timeout: Duration::from_secs(config.build.timeout_secs),
        }
    }
}

/// Values substituted into step strings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepContext {
    /// `{target}`
    pub target: String,
    /// `{platform}`
    pub platform: String,
    /// `{binary_name}`
    pub binary_name: String,
    /// `{artifact}`, relative to the project root
    pub artifact: String,
    /// `{output_dir}`, relative to the project root
    pub output_dir: String,
}

impl StepContext {
    /// Context for one target
    pub fn new(target: &TargetDescriptor, options: &ExecutorOptions) -> Self {
        let file_name = target.artifact_name(&options.binary_name);
        let output_dir = options.output_dir.to_string_lossy().into_owned();
        let artifact = if output_dir.is_empty() || output_dir == "." {
            file_name
        } else {
            format!("{}/{}", output_dir.trim_end_matches('/'), file_name)
        };

        Self {
            target: target.triple.to_string(),
            platform: target.triple.node_platform().suffix(),
            binary_name: options.binary_name.clone(),
            artifact,
            output_dir,
        }
    }

    /// Substitute placeholders in a step
    pub fn expand(&self, step: &str) -> String {
        step.replace("{target}", &self.target)
            .replace("{platform}", &self.platform)
            .replace("{binary_name}", &self.binary_name)
            .replace("{artifact}", &self.artifact)
            .replace("{output_dir}", &self.output_dir)
    }
}

/// Runs provisioning, build and post-process for a single target
pub struct BuildExecutor {
    options: ExecutorOptions,
    reporter: Arc<dyn BuildReporter>,
    cancel: CancelSignal,
}

impl BuildExecutor {
    /// Create an executor
    pub fn new(options: ExecutorOptions, reporter: Arc<dyn BuildReporter>) -> Self {
        Self {
            options,
            reporter,
            cancel: CancelSignal::never(),
        }
    }

    /// Stop in-flight targets when `cancel` fires
    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    /// Executor options
    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    /// Where the artifact of `target` is written
    pub fn artifact_path(&self, target: &TargetDescriptor) -> PathBuf {
        self.options
            .root_dir
            .join(&self.options.output_dir)
            .join(target.artifact_name(&self.options.binary_name))
    }

    /// Build one target. Never retries and never returns an error: every
    /// failure becomes a [`BuildResult`] value.
    #[instrument(skip_all, fields(triple = %target.triple))]
    pub async fn execute(&self, target: &TargetDescriptor) -> BuildResult {
        let start = Instant::now();
        let environment = ExecutionEnvironment::for_target(
            &target.environment,
            &self.options.root_dir,
            &self.options.container_runtime,
            &self.options.container_workdir,
        );

        self.reporter.report(&BuildEvent::TargetStarted {
            triple: target.triple.clone(),
            environment: environment.label(),
        });

        let mut cancel = self.cancel.clone();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(BuildFailure::Cancelled),
            result = tokio::time::timeout(self.options.timeout, self.run_phases(target, &environment)) => {
                result.unwrap_or(Err(BuildFailure::TimedOut { after: self.options.timeout }))
            }
        };

        let duration = start.elapsed();
        match outcome {
            Ok(artifact) => {
                self.reporter.report(&BuildEvent::TargetSucceeded {
                    triple: target.triple.clone(),
                    artifact: artifact.clone(),
                    duration,
                });
                BuildResult::success(target.triple.clone(), artifact, duration)
            }
            Err(cause) => {
                self.reporter.report(&BuildEvent::TargetFailed {
                    triple: target.triple.clone(),
                    error: cause.to_string(),
                    duration,
                });
                BuildResult::failure(target.triple.clone(), cause, duration)
            }
        }
    }

    async fn run_phases(
        &self,
        target: &TargetDescriptor,
        environment: &ExecutionEnvironment,
    ) -> Result<PathBuf, BuildFailure> {
        let context = StepContext::new(target, &self.options);
        let artifact = self.artifact_path(target);

        // A leftover artifact from an earlier run must not count as output
        prepare_output(&artifact).await.map_err(|e| BuildFailure::SpawnFailed {
            phase: BuildPhase::Setup,
            step: format!("prepare {}", artifact.display()),
            reason: e.to_string(),
        })?;

        let phases = [
            (BuildPhase::Setup, &target.setup),
            (BuildPhase::Build, &target.build),
            (BuildPhase::PostProcess, &target.strip),
        ];

        for (phase, steps) in phases {
            for step in steps {
                let step = context.expand(step);
                self.run_step(target, environment, phase, &step).await?;
            }
        }

        if tokio::fs::try_exists(&artifact).await.unwrap_or(false) {
            Ok(artifact)
        } else {
            Err(BuildFailure::ArtifactMissing { path: artifact })
        }
    }

    async fn run_step(
        &self,
        target: &TargetDescriptor,
        environment: &ExecutionEnvironment,
        phase: BuildPhase,
        step: &str,
    ) -> Result<(), BuildFailure> {
        debug!(%phase, step, "running step");
        self.reporter.report(&BuildEvent::StepStarted {
            triple: target.triple.clone(),
            phase,
            step: step.to_string(),
        });

        let reporter = &self.reporter;
        let output = environment
            .run(step, &self.options.env, |line, is_stderr| {
                reporter.report(&BuildEvent::Output {
                    triple: target.triple.clone(),
                    line: line.to_string(),
                    is_stderr,
                });
            })
            .await
            .map_err(|e| BuildFailure::SpawnFailed {
                phase,
                step: step.to_string(),
                reason: e.to_string(),
            })?;

        if output.success() {
            Ok(())
        } else {
            Err(BuildFailure::StepFailed {
                phase,
                step: step.to_string(),
                status: output.status,
                stderr_tail: output.stderr_tail(STDERR_TAIL_LINES),
            })
        }
    }
}

async fn prepare_output(artifact: &Path) -> std::io::Result<()> {
    if let Some(dir) = artifact.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    match tokio::fs::remove_file(artifact).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::cancel::cancel_pair;
    use crate::reporter::CollectingReporter;
    use crate::result::ExitStatus;
    use gantry_core::TargetTriple;
    use tempfile::TempDir;

    fn target(build: &str) -> TargetDescriptor {
        TargetDescriptor::new(TargetTriple::parse("x86_64-unknown-linux-gnu").unwrap(), build)
    }

    fn executor(root: &Path) -> (BuildExecutor, Arc<CollectingReporter>) {
        let reporter = Arc::new(CollectingReporter::default());
        let options = ExecutorOptions {
            root_dir: root.to_path_buf(),
            output_dir: PathBuf::from("out"),
            timeout: Duration::from_secs(30),
            ..Default::default()
        };
        (BuildExecutor::new(options, reporter.clone()), reporter)
    }

    #[test]
    fn test_step_context_expansion() {
        let options = ExecutorOptions {
            output_dir: PathBuf::from("npm/"),
            binary_name: "addon".to_string(),
            ..Default::default()
        };
        let context = StepContext::new(&target("true"), &options);
        assert_eq!(
            context.expand("napi build --target {target} && strip {artifact} # {platform} {binary_name} {output_dir}"),
            "napi build --target x86_64-unknown-linux-gnu && strip npm/addon.linux-x64-gnu.node # linux-x64-gnu addon npm/"
        );

        let flat = ExecutorOptions::default();
        let context = StepContext::new(&target("true"), &flat);
        assert_eq!(context.artifact, "cli.linux-x64-gnu.node");
    }

    #[tokio::test]
    async fn test_success_writes_artifact() {
        let temp = TempDir::new().unwrap();
        let (executor, reporter) = executor(temp.path());
        let target = target("printf binary > {artifact}")
            .with_setup("mkdir -p setup-ran")
            .with_strip("test -s {artifact}");

        let result = executor.execute(&target).await;
        assert!(result.is_success(), "{:?}", result.outcome);
        let artifact = result.artifact().unwrap();
        assert_eq!(artifact, &temp.path().join("out/cli.linux-x64-gnu.node"));
        assert_eq!(std::fs::read_to_string(artifact).unwrap(), "binary");
        assert!(temp.path().join("setup-ran").exists());

        let steps = reporter
            .events()
            .iter()
            .filter(|e| matches!(e, BuildEvent::StepStarted { .. }))
            .count();
        assert_eq!(steps, 3);
    }

    #[tokio::test]
    async fn test_build_failure_carries_phase_and_code() {
        let temp = TempDir::new().unwrap();
        let (executor, _) = executor(temp.path());
        let target = target("echo broken >&2; exit 7").with_strip("touch strip-ran");

        let result = executor.execute(&target).await;
        match result.failure_cause() {
            Some(BuildFailure::StepFailed {
                phase,
                status,
                stderr_tail,
                ..
            }) => {
                assert_eq!(*phase, BuildPhase::Build);
                assert_eq!(*status, ExitStatus::Code(7));
                assert_eq!(stderr_tail, "broken");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(!temp.path().join("strip-ran").exists());
    }

    #[tokio::test]
    async fn test_strip_failure_fails_target() {
        let temp = TempDir::new().unwrap();
        let (executor, _) = executor(temp.path());
        let target = target("printf x > {artifact}").with_strip("exit 1");

        let result = executor.execute(&target).await;
        assert_eq!(
            result.failure_cause().map(BuildFailure::kind),
            Some("post_process_failure")
        );
    }

    #[tokio::test]
    async fn test_zero_exit_without_artifact() {
        let temp = TempDir::new().unwrap();
        let (executor, _) = executor(temp.path());

        let result = executor.execute(&target("true")).await;
        assert!(matches!(
            result.failure_cause(),
            Some(BuildFailure::ArtifactMissing { .. })
        ));
    }

    #[tokio::test]
    async fn test_stale_artifact_is_not_reused() {
        let temp = TempDir::new().unwrap();
        let (executor, _) = executor(temp.path());
        std::fs::create_dir_all(temp.path().join("out")).unwrap();
        std::fs::write(temp.path().join("out/cli.linux-x64-gnu.node"), "old").unwrap();

        let result = executor.execute(&target("true")).await;
        assert!(!result.is_success());
    }

    #[tokio::test]
    async fn test_timeout() {
        let temp = TempDir::new().unwrap();
        let (mut executor, _) = executor(temp.path());
        executor.options.timeout = Duration::from_millis(100);

        let result = executor.execute(&target("sleep 10")).await;
        assert!(matches!(
            result.failure_cause(),
            Some(BuildFailure::TimedOut { .. })
        ));
    }

    #[tokio::test]
    async fn test_timeout_kills_whole_step_tree() {
        let temp = TempDir::new().unwrap();
        let (mut executor, _) = executor(temp.path());
        executor.options.timeout = Duration::from_millis(200);

        let result = executor
            .execute(&target("(sleep 1; touch late-write); true"))
            .await;
        assert_eq!(result.failure_cause().map(BuildFailure::kind), Some("timed_out"));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!temp.path().join("late-write").exists());
    }

    #[tokio::test]
    async fn test_non_utf8_output_does_not_fail_step() {
        let temp = TempDir::new().unwrap();
        let (executor, _) = executor(temp.path());
        let target = target(
            "printf '\\377\\n'; head -c 300000 /dev/zero | tr '\\0' a; echo; printf bin > {artifact}",
        );

        let result = executor.execute(&target).await;
        assert!(result.is_success(), "{:?}", result.outcome);
    }

    #[tokio::test]
    async fn test_cancel_stops_running_target() {
        let temp = TempDir::new().unwrap();
        let (executor, _) = executor(temp.path());
        let (handle, signal) = cancel_pair();
        let executor = executor.with_cancel(signal);

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            handle.cancel();
        });

        let start = Instant::now();
        let result = executor.execute(&target("sleep 10")).await;
        canceller.await.unwrap();

        assert_eq!(result.failure_cause(), Some(&BuildFailure::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_missing_shell_tool_is_step_failure() {
        let temp = TempDir::new().unwrap();
        let (executor, _) = executor(temp.path());

        let result = executor
            .execute(&target("definitely-not-a-real-tool-xyz"))
            .await;
        assert!(matches!(
            result.failure_cause(),
            Some(BuildFailure::StepFailed {
                status: ExitStatus::Code(127),
                ..
            })
        ));
    }
}
