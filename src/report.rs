//! Job progress reporting.
//!
//! The job controller notifies a [`Reporter`] as the run progresses. The
//! console reporter drives a progress bar and prints a summary. The log
//! reporter emits the same events through `tracing`, so results that did not
//! pass still reach stderr when the progress bar is hidden. The null reporter
//! is used in tests and by callers that only need the returned [`JobSummary`].

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::executor::{TestOutcome, TestResult};
use crate::job::{JobState, JobSummary};

/// Receives events during a job run.
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Called once the plan is known and the result directory exists.
    async fn on_plan_ready(&self, job_id: &str, logdir: &Path, total: usize);

    /// Called when a plan entry starts running.
    async fn on_test_start(&self, test_id: &str);

    /// Called for every recorded result, including unresolved references
    /// and entries that never started.
    async fn on_test_complete(&self, result: &TestResult);

    /// Called when the job has finished.
    async fn on_job_complete(&self, summary: &JobSummary);
}

/// A reporter that does nothing.
pub struct NullReporter;

#[async_trait]
impl Reporter for NullReporter {
    async fn on_plan_ready(&self, _job_id: &str, _logdir: &Path, _total: usize) {}
    async fn on_test_start(&self, _test_id: &str) {}
    async fn on_test_complete(&self, _result: &TestResult) {}
    async fn on_job_complete(&self, _summary: &JobSummary) {}
}

/// A reporter that forwards events to several reporters in order.
#[derive(Default)]
pub struct MultiReporter {
    reporters: Vec<Box<dyn Reporter>>,
}

impl MultiReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reporter<R: Reporter + 'static>(mut self, reporter: R) -> Self {
        self.reporters.push(Box::new(reporter));
        self
    }
}

#[async_trait]
impl Reporter for MultiReporter {
    async fn on_plan_ready(&self, job_id: &str, logdir: &Path, total: usize) {
        for reporter in &self.reporters {
            reporter.on_plan_ready(job_id, logdir, total).await;
        }
    }

    async fn on_test_start(&self, test_id: &str) {
        for reporter in &self.reporters {
            reporter.on_test_start(test_id).await;
        }
    }

    async fn on_test_complete(&self, result: &TestResult) {
        for reporter in &self.reporters {
            reporter.on_test_complete(result).await;
        }
    }

    async fn on_job_complete(&self, summary: &JobSummary) {
        for reporter in &self.reporters {
            reporter.on_job_complete(summary).await;
        }
    }
}

/// Reporter that logs job events through `tracing`.
pub struct LogReporter;

#[async_trait]
impl Reporter for LogReporter {
    async fn on_plan_ready(&self, job_id: &str, logdir: &Path, total: usize) {
        debug!("Job {} planned {} entries in {}", job_id, total, logdir.display());
    }

    async fn on_test_start(&self, test_id: &str) {
        debug!("Started {}", test_id);
    }

    async fn on_test_complete(&self, result: &TestResult) {
        let label = outcome_label(result.outcome);
        if result.outcome.is_success() {
            debug!("{} {}", label, result.test_id);
            return;
        }
        match &result.error_message {
            Some(msg) => warn!("{} {}: {}", label, result.test_id, msg),
            None => warn!("{} {}", label, result.test_id),
        }
    }

    async fn on_job_complete(&self, summary: &JobSummary) {
        debug!(
            "Job {} finished as {:?} with exit status {}",
            summary.job_id,
            summary.state,
            summary.status.code()
        );
    }
}

/// Console reporter with a progress bar.
pub struct ConsoleReporter {
    progress: Mutex<Option<indicatif::ProgressBar>>,
    verbose: bool,
}

impl ConsoleReporter {
    pub fn new(verbose: bool) -> Self {
        Self {
            progress: Mutex::new(None),
            verbose,
        }
    }

    fn with_progress(&self, f: impl FnOnce(&indicatif::ProgressBar)) {
        if let Ok(guard) = self.progress.lock() {
            if let Some(pb) = guard.as_ref() {
                f(pb);
            }
        }
    }
}

fn outcome_label(outcome: TestOutcome) -> &'static str {
    match outcome {
        TestOutcome::Passed => "PASS",
        TestOutcome::Failed => "FAIL",
        TestOutcome::Skipped => "SKIP",
        TestOutcome::Error => "ERROR",
        TestOutcome::Interrupted => "INTERRUPTED",
    }
}

fn styled_outcome(outcome: TestOutcome) -> console::StyledObject<&'static str> {
    let label = console::style(outcome_label(outcome));
    match outcome {
        TestOutcome::Passed => label.green(),
        TestOutcome::Failed => label.red(),
        TestOutcome::Skipped => label.yellow(),
        TestOutcome::Error => label.red().bold(),
        TestOutcome::Interrupted => label.magenta(),
    }
}

#[async_trait]
impl Reporter for ConsoleReporter {
    async fn on_plan_ready(&self, job_id: &str, logdir: &Path, total: usize) {
        println!("JOB ID     : {}", job_id);
        println!("JOB LOG    : {}", logdir.display());

        let pb = indicatif::ProgressBar::new(total as u64);
        match indicatif::ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
        {
            Ok(style) => pb.set_style(style.progress_chars("#>-")),
            Err(e) => tracing::debug!("Invalid progress template: {}", e),
        }

        if let Ok(mut guard) = self.progress.lock() {
            *guard = Some(pb);
        }
    }

    async fn on_test_start(&self, test_id: &str) {
        if self.verbose {
            self.with_progress(|pb| pb.println(format!("Running: {}", test_id)));
        }
    }

    async fn on_test_complete(&self, result: &TestResult) {
        self.with_progress(|pb| {
            pb.inc(1);
            if self.verbose || result.outcome != TestOutcome::Passed {
                pb.println(format!(
                    "{} {} ({:.2}s)",
                    styled_outcome(result.outcome),
                    result.test_id,
                    result.duration.as_secs_f64()
                ));
            }
        });
    }

    async fn on_job_complete(&self, summary: &JobSummary) {
        if let Ok(mut guard) = self.progress.lock() {
            if let Some(pb) = guard.take() {
                pb.finish_and_clear();
            }
        }
        print_summary(summary);
    }
}

/// Prints the final job summary to stdout.
pub fn print_summary(summary: &JobSummary) {
    println!();
    println!("Results:");
    println!("  Total:       {}", summary.total);
    println!("  Passed:      {}", console::style(summary.passed).green());
    println!("  Failed:      {}", console::style(summary.failed).red());
    println!("  Errors:      {}", console::style(summary.errors).red());
    println!("  Skipped:     {}", console::style(summary.skipped).yellow());
    if summary.interrupted > 0 {
        println!(
            "  Interrupted: {}",
            console::style(summary.interrupted).magenta().bold()
        );
    }
    println!("  Duration:    {:.2}s", summary.duration.as_secs_f64());
    println!("  Results:     {}", summary.logdir.join("results.json").display());

    println!();
    match summary.state {
        JobState::TimedOut => println!("{}", console::style("Job timed out.").red().bold()),
        JobState::Aborted => println!("{}", console::style("Job was aborted.").red().bold()),
        _ if summary.success() => {
            println!("{}", console::style("All tests passed!").green().bold())
        }
        _ => println!("{}", console::style("Some tests did not pass.").red().bold()),
    }

    let problems: Vec<&TestResult> = summary
        .results
        .iter()
        .filter(|r| matches!(r.outcome, TestOutcome::Failed | TestOutcome::Error))
        .collect();
    if !problems.is_empty() {
        println!();
        println!("Failed tests:");
        for r in problems {
            println!("  - {} [{}]", r.test_id, styled_outcome(r.outcome));
            if let Some(msg) = &r.error_message {
                println!("    {}", console::style(msg).dim());
            }
            if let Some(logdir) = &r.logdir {
                println!("    {}", console::style(logdir.display()).dim());
            }
        }
    }
}
