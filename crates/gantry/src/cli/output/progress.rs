//! Terminal progress for matrix builds

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use gantry_core::TargetTriple;
use gantry_tasks::{BuildEvent, BuildReporter};

/// One spinner per target while the matrix builds
pub struct ProgressReporter {
    multi: MultiProgress,
    bars: Mutex<HashMap<TargetTriple, ProgressBar>>,
    style: ProgressStyle,
}

impl ProgressReporter {
    pub fn new() -> Self {
        let style = ProgressStyle::with_template("{spinner:.blue} {prefix:.cyan} {wide_msg:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
            style,
        }
    }

    fn with_bar(&self, triple: &TargetTriple, f: impl FnOnce(&ProgressBar)) {
        if let Ok(bars) = self.bars.lock() {
            if let Some(bar) = bars.get(triple) {
                f(bar);
            }
        }
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildReporter for ProgressReporter {
    fn report(&self, event: &BuildEvent) {
        match event {
            BuildEvent::TargetStarted {
                triple,
                environment,
            } => {
                let bar = self.multi.add(ProgressBar::new_spinner());
                bar.set_style(self.style.clone());
                bar.set_prefix(triple.to_string());
                bar.set_message(environment.clone());
                bar.enable_steady_tick(Duration::from_millis(120));
                if let Ok(mut bars) = self.bars.lock() {
                    // A retry replaces the finished bar of the previous attempt
                    if let Some(old) = bars.insert(triple.clone(), bar) {
                        old.finish_and_clear();
                    }
                }
            }
            BuildEvent::StepStarted { triple, phase, step } => {
                self.with_bar(triple, |bar| bar.set_message(format!("{}: {}", phase, step)));
            }
            BuildEvent::TargetSucceeded {
                triple, duration, ..
            } => {
                self.with_bar(triple, |bar| {
                    bar.finish_with_message(format!(
                        "{} {:.1}s",
                        style("✓").green(),
                        duration.as_secs_f64()
                    ))
                });
            }
            BuildEvent::TargetFailed { triple, error, .. } => {
                self.with_bar(triple, |bar| {
                    bar.finish_with_message(format!("{} {}", style("✗").red(), error))
                });
            }
            _ => {}
        }
    }
}
