//! Build execution reporting

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use gantry_core::TargetTriple;

use crate::result::BuildPhase;

/// Events emitted while the matrix builds
#[derive(Debug, Clone)]
pub enum BuildEvent {
    /// Fan-out is starting
    MatrixStarted { targets: usize, concurrency: usize },
    /// A target is starting execution
    TargetStarted {
        triple: TargetTriple,
        environment: String,
    },
    /// A step is about to run
    StepStarted {
        triple: TargetTriple,
        phase: BuildPhase,
        step: String,
    },
    /// A step produced output
    Output {
        triple: TargetTriple,
        line: String,
        is_stderr: bool,
    },
    /// A failed target is being attempted again
    Retrying {
        triple: TargetTriple,
        attempt: u32,
        error: String,
    },
    /// A target produced its artifact
    TargetSucceeded {
        triple: TargetTriple,
        artifact: PathBuf,
        duration: Duration,
    },
    /// A target failed
    TargetFailed {
        triple: TargetTriple,
        error: String,
        duration: Duration,
    },
    /// Every target has joined
    MatrixCompleted {
        total: usize,
        succeeded: usize,
        failed: usize,
        duration: Duration,
    },
}

/// Trait for reporting build progress
pub trait BuildReporter: Send + Sync {
    /// Handle a build event
    fn report(&self, event: &BuildEvent);
}

/// Simple reporter that logs to tracing
#[derive(Debug, Default)]
pub struct TracingReporter;

impl BuildReporter for TracingReporter {
    fn report(&self, event: &BuildEvent) {
        match event {
            BuildEvent::MatrixStarted {
                targets,
                concurrency,
            } => {
                tracing::info!(targets, concurrency, "building target matrix");
            }
            BuildEvent::TargetStarted {
                triple,
                environment,
            } => {
                tracing::info!("Starting {} ({})", triple, environment);
            }
            BuildEvent::StepStarted {
                triple,
                phase,
                step,
            } => {
                tracing::debug!("[{}] {}: {}", triple, phase, step);
            }
            BuildEvent::Output {
                triple,
                line,
                is_stderr,
            } => {
                if *is_stderr {
                    tracing::debug!(stream = "stderr", "[{}] {}", triple, line);
                } else {
                    tracing::trace!(stream = "stdout", "[{}] {}", triple, line);
                }
            }
            BuildEvent::Retrying {
                triple,
                attempt,
                error,
            } => {
                tracing::warn!("{} failed ({}), attempt {}", triple, error, attempt);
            }
            BuildEvent::TargetSucceeded {
                triple,
                artifact,
                duration,
            } => {
                tracing::info!(
                    "{} built {} in {:.1}s",
                    triple,
                    artifact.display(),
                    duration.as_secs_f64()
                );
            }
            BuildEvent::TargetFailed {
                triple,
                error,
                duration,
            } => {
                tracing::error!(
                    "{} failed after {:.1}s: {}",
                    triple,
                    duration.as_secs_f64(),
                    error
                );
            }
            BuildEvent::MatrixCompleted {
                total,
                succeeded,
                failed,
                duration,
            } => {
                tracing::info!(
                    "Matrix complete: {}/{} succeeded, {} failed ({:.1}s)",
                    succeeded,
                    total,
                    failed,
                    duration.as_secs_f64()
                );
            }
        }
    }
}

/// Reporter that collects events for later inspection (useful for testing)
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: std::sync::Mutex<Vec<BuildEvent>>,
}

impl CollectingReporter {
    /// Get all collected events
    pub fn events(&self) -> Vec<BuildEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl BuildReporter for CollectingReporter {
    fn report(&self, event: &BuildEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Fans every event out to several reporters
pub struct BuildReporterRegistry {
    reporters: Vec<Arc<dyn BuildReporter>>,
}

impl BuildReporterRegistry {
    /// Registry with the tracing reporter
    pub fn new() -> Self {
        Self {
            reporters: vec![Arc::new(TracingReporter)],
        }
    }

    /// Registry with no reporters
    pub fn empty() -> Self {
        Self {
            reporters: Vec::new(),
        }
    }

    /// Add a reporter
    pub fn register<R: BuildReporter + 'static>(&mut self, reporter: R) {
        self.reporters.push(Arc::new(reporter));
    }

    /// Add a shared reporter
    pub fn register_shared(&mut self, reporter: Arc<dyn BuildReporter>) {
        self.reporters.push(reporter);
    }

    pub fn all(&self) -> &[Arc<dyn BuildReporter>] {
        &self.reporters
    }
}

impl Default for BuildReporterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildReporter for BuildReporterRegistry {
    fn report(&self, event: &BuildEvent) {
        for reporter in &self.reporters {
            reporter.report(event);
        }
    }
}
