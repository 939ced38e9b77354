//! Matrix scheduler - bounded parallel fan-out with a join barrier

use std::sync::Arc;
use std::time::{Duration, Instant};

use gantry_core::{ArtifactStore, TargetTriple};
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::executor::BuildExecutor;
use crate::reporter::{BuildEvent, BuildReporter};
use crate::result::{BuildFailure, BuildOutcome, BuildResult};

/// Options for the matrix scheduler
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Maximum targets building at once
    pub concurrency: usize,
    /// Extra attempts for a failed target
    pub retries: u32,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            concurrency: num_cpus(),
            retries: 0,
        }
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Every target's result after the barrier, in matrix order
#[derive(Debug, Clone, Serialize)]
pub struct BuildSummary {
    /// One result per target
    pub results: Vec<BuildResult>,
    /// Wall time of the whole fan-out
    pub duration: Duration,
}

impl BuildSummary {
    /// Number of targets that produced an artifact
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    /// Number of failed targets
    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    /// Check if every target succeeded
    pub fn is_success(&self) -> bool {
        self.results.iter().all(BuildResult::is_success)
    }

    /// Triples without an artifact
    pub fn failed_triples(&self) -> Vec<TargetTriple> {
        self.results
            .iter()
            .filter(|r| !r.is_success())
            .map(|r| r.triple.clone())
            .collect()
    }

    /// Check if any target was cancelled
    pub fn was_cancelled(&self) -> bool {
        self.results
            .iter()
            .any(|r| r.failure_cause() == Some(&BuildFailure::Cancelled))
    }
}

/// Runs one executor invocation per matrix target and deposits successes
pub struct MatrixScheduler {
    executor: Arc<BuildExecutor>,
    options: SchedulerOptions,
    reporter: Arc<dyn BuildReporter>,
}

impl MatrixScheduler {
    /// Create a new scheduler
    pub fn new(
        executor: Arc<BuildExecutor>,
        options: SchedulerOptions,
        reporter: Arc<dyn BuildReporter>,
    ) -> Self {
        Self {
            executor,
            options,
            reporter,
        }
    }

    /// Build every target of the store's matrix.
    ///
    /// A failing target never stops its siblings. Returns after all spawned
    /// tasks have joined, so the store is quiescent when this resolves.
    pub async fn run(&self, store: Arc<ArtifactStore>) -> BuildSummary {
        let start = Instant::now();
        let targets = store.matrix().targets().to_vec();
        let concurrency = self.options.concurrency.max(1);
        let semaphore = Arc::new(Semaphore::new(concurrency));

        self.reporter.report(&BuildEvent::MatrixStarted {
            targets: targets.len(),
            concurrency,
        });

        let mut handles = Vec::with_capacity(targets.len());
        for target in targets {
            let semaphore = semaphore.clone();
            let executor = self.executor.clone();
            let reporter = self.reporter.clone();
            let store = store.clone();
            let retries = self.options.retries;
            let triple = target.triple.clone();

            let handle = tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return BuildResult::failure(
                        target.triple.clone(),
                        BuildFailure::Cancelled,
                        Duration::ZERO,
                    );
                };

                let mut attempt = 1;
                let mut result = executor.execute(&target).await;
                while attempt <= retries {
                    let Some(cause) = result.failure_cause().filter(|c| c.is_retryable()) else {
                        break;
                    };
                    attempt += 1;
                    reporter.report(&BuildEvent::Retrying {
                        triple: target.triple.clone(),
                        attempt,
                        error: cause.to_string(),
                    });
                    result = executor.execute(&target).await;
                }
                result.attempts = attempt;

                deposit(&store, result).await
            });

            handles.push((triple, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (triple, handle) in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!(%triple, error = %e, "build task panicked");
                    results.push(BuildResult::failure(
                        triple,
                        BuildFailure::Panicked {
                            reason: e.to_string(),
                        },
                        Duration::ZERO,
                    ));
                }
            }
        }

        let summary = BuildSummary {
            results,
            duration: start.elapsed(),
        };
        self.reporter.report(&BuildEvent::MatrixCompleted {
            total: summary.results.len(),
            succeeded: summary.succeeded(),
            failed: summary.failed(),
            duration: summary.duration,
        });
        summary
    }
}

/// Hand a successful artifact to the store; a rejected deposit fails the target
async fn deposit(store: &ArtifactStore, result: BuildResult) -> BuildResult {
    let Some(artifact) = result.artifact() else {
        return result;
    };

    match store.deposit(&result.triple, artifact).await {
        Ok(deposited) => {
            debug!(triple = %result.triple, sha256 = %deposited.sha256, "deposited");
            result
        }
        Err(e) => BuildResult {
            outcome: BuildOutcome::Failure {
                cause: BuildFailure::Deposit {
                    reason: e.to_string(),
                },
            },
            ..result
        },
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::executor::ExecutorOptions;
    use crate::reporter::CollectingReporter;
    use gantry_core::error::ArtifactError;
    use gantry_core::{TargetDescriptor, TargetMatrix};
    use std::path::Path;
    use tempfile::TempDir;

    fn t(s: &str) -> TargetTriple {
        TargetTriple::parse(s).unwrap()
    }

    const WRITE: &str = "printf {target} > {artifact}";

    fn scheduler(root: &Path, retries: u32) -> (MatrixScheduler, Arc<CollectingReporter>) {
        scheduler_with(root, retries, 2)
    }

    fn scheduler_with(
        root: &Path,
        retries: u32,
        concurrency: usize,
    ) -> (MatrixScheduler, Arc<CollectingReporter>) {
        let reporter = Arc::new(CollectingReporter::default());
        let options = ExecutorOptions {
            root_dir: root.to_path_buf(),
            timeout: Duration::from_secs(30),
            ..Default::default()
        };
        let executor = Arc::new(BuildExecutor::new(options, reporter.clone()));
        let scheduler = MatrixScheduler::new(
            executor,
            SchedulerOptions {
                concurrency,
                retries,
            },
            reporter.clone(),
        );
        (scheduler, reporter)
    }

    fn store(targets: Vec<TargetDescriptor>) -> Arc<ArtifactStore> {
        Arc::new(ArtifactStore::new(Arc::new(
            TargetMatrix::new(targets).unwrap(),
        )))
    }

    #[tokio::test]
    async fn test_all_targets_succeed() {
        let temp = TempDir::new().unwrap();
        let (scheduler, reporter) = scheduler(temp.path(), 0);
        let store = store(vec![
            TargetDescriptor::new(t("x86_64-unknown-linux-gnu"), WRITE),
            TargetDescriptor::new(t("aarch64-apple-darwin"), WRITE),
            TargetDescriptor::new(t("x86_64-pc-windows-msvc"), WRITE),
        ]);

        let summary = scheduler.run(store.clone()).await;
        assert!(summary.is_success());
        assert_eq!(summary.succeeded(), 3);

        let set = store.collect_all().unwrap();
        assert_eq!(set.len(), 3);
        let darwin = set.get(&t("aarch64-apple-darwin")).unwrap();
        assert_eq!(
            std::fs::read_to_string(&darwin.path).unwrap(),
            "aarch64-apple-darwin"
        );

        let completed = reporter
            .events()
            .into_iter()
            .filter(|e| matches!(e, BuildEvent::MatrixCompleted { .. }))
            .count();
        assert_eq!(completed, 1);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_stop_siblings() {
        let temp = TempDir::new().unwrap();
        let (scheduler, _) = scheduler(temp.path(), 0);
        let store = store(vec![
            TargetDescriptor::new(t("x86_64-unknown-linux-gnu"), WRITE),
            TargetDescriptor::new(t("aarch64-apple-darwin"), "exit 1"),
            TargetDescriptor::new(t("x86_64-pc-windows-msvc"), WRITE),
        ]);

        let summary = scheduler.run(store.clone()).await;
        assert_eq!(summary.succeeded(), 2);
        assert_eq!(summary.failed_triples(), vec![t("aarch64-apple-darwin")]);

        match store.collect_all() {
            Err(ArtifactError::Incomplete { missing }) => {
                assert_eq!(missing, vec![t("aarch64-apple-darwin")]);
            }
            other => panic!("expected incomplete, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_results_in_matrix_order_regardless_of_completion() {
        let temp = TempDir::new().unwrap();
        let (scheduler, _) = scheduler(temp.path(), 0);
        let store = store(vec![
            TargetDescriptor::new(t("x86_64-unknown-linux-gnu"), "sleep 0.3")
                .with_build(WRITE),
            TargetDescriptor::new(t("aarch64-apple-darwin"), WRITE),
            TargetDescriptor::new(t("x86_64-pc-windows-msvc"), "sleep 0.1")
                .with_build(WRITE),
        ]);

        let summary = scheduler.run(store.clone()).await;
        let order: Vec<TargetTriple> = summary.results.iter().map(|r| r.triple.clone()).collect();
        assert_eq!(order, store.matrix().triples());
        assert!(summary.is_success());
    }

    #[tokio::test]
    async fn test_retries_failed_target() {
        let temp = TempDir::new().unwrap();
        let (scheduler, reporter) = scheduler(temp.path(), 2);
        let flaky = "test -f flaky-marker || { touch flaky-marker; exit 1; }";
        let store = store(vec![
            TargetDescriptor::new(t("x86_64-unknown-linux-gnu"), flaky).with_build(WRITE)
        ]);

        let summary = scheduler.run(store.clone()).await;
        assert!(summary.is_success());
        assert_eq!(summary.results[0].attempts, 2);
        assert!(reporter
            .events()
            .iter()
            .any(|e| matches!(e, BuildEvent::Retrying { attempt: 2, .. })));
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let temp = TempDir::new().unwrap();
        let (scheduler, _) = scheduler(temp.path(), 1);
        let store = store(vec![TargetDescriptor::new(
            t("x86_64-unknown-linux-gnu"),
            "exit 2",
        )]);

        let summary = scheduler.run(store.clone()).await;
        assert!(!summary.is_success());
        assert_eq!(summary.results[0].attempts, 2);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_pre_deposited_target_fails_on_duplicate() {
        let temp = TempDir::new().unwrap();
        let (scheduler, _) = scheduler(temp.path(), 0);
        let store = store(vec![TargetDescriptor::new(
            t("x86_64-unknown-linux-gnu"),
            WRITE,
        )]);
        let earlier = temp.path().join("earlier.node");
        std::fs::write(&earlier, "x").unwrap();
        store
            .deposit(&t("x86_64-unknown-linux-gnu"), &earlier)
            .await
            .unwrap();

        let summary = scheduler.run(store).await;
        assert_eq!(
            summary.results[0].failure_cause().map(BuildFailure::kind),
            Some("deposit_failed")
        );
    }

    #[tokio::test]
    async fn test_outcomes_independent_of_concurrency() {
        let targets = || {
            vec![
                TargetDescriptor::new(t("x86_64-unknown-linux-gnu"), "sleep 0.2")
                    .with_build(WRITE),
                TargetDescriptor::new(t("aarch64-apple-darwin"), "exit 3"),
                TargetDescriptor::new(t("x86_64-pc-windows-msvc"), WRITE),
                TargetDescriptor::new(t("aarch64-unknown-linux-gnu"), "sleep 0.1")
                    .with_build(WRITE),
            ]
        };
        let outcomes = |summary: &BuildSummary| -> Vec<(TargetTriple, &'static str)> {
            summary
                .results
                .iter()
                .map(|r| {
                    let kind = r.failure_cause().map(BuildFailure::kind).unwrap_or("success");
                    (r.triple.clone(), kind)
                })
                .collect()
        };

        let serial_dir = TempDir::new().unwrap();
        let (serial, _) = scheduler_with(serial_dir.path(), 0, 1);
        let serial_store = store(targets());
        let serial_summary = serial.run(serial_store.clone()).await;

        let parallel_dir = TempDir::new().unwrap();
        let (parallel, _) = scheduler_with(parallel_dir.path(), 0, 4);
        let parallel_store = store(targets());
        let parallel_summary = parallel.run(parallel_store.clone()).await;

        assert_eq!(outcomes(&serial_summary), outcomes(&parallel_summary));
        assert_eq!(serial_summary.failed_triples(), vec![t("aarch64-apple-darwin")]);

        let serial_collection = serial_store.collect_available().unwrap();
        let parallel_collection = parallel_store.collect_available().unwrap();
        assert_eq!(serial_collection.missing, parallel_collection.missing);
        let (serial_set, parallel_set) = (serial_collection.artifacts, parallel_collection.artifacts);
        assert_eq!(serial_set.len(), 3);
        assert_eq!(serial_set.triples(), parallel_set.triples());
        for triple in serial_set.triples() {
            assert_eq!(
                serial_set.get(&triple).unwrap().sha256,
                parallel_set.get(&triple).unwrap().sha256
            );
        }
    }
}
