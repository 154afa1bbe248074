//! Job controller.
//!
//! A [`Job`] owns a run identity and a result directory, crosses resolved
//! tests with parameter variants and supervises their execution.
//!
//! # Lifecycle
//!
//! ```text
//!  CREATED ──► RESOLVING ──► PLANNING ──► RUNNING ──┬──► COMPLETED
//!                                                   ├──► TIMED_OUT
//!                                                   └──► ABORTED
//! ```
//!
//! - `CREATED`: identity and timeout are validated in [`Job::new`].
//! - `RESOLVING`: references are resolved while parameter sources load.
//! - `PLANNING`: the plan is every resolution crossed with every variant.
//! - `RUNNING`: entries run under the global and per-test timeouts.
//!
//! # Result Directory
//!
//! ```text
//! <results_dir>/
//! ├── latest -> job-2024-05-01T12.30-3f2a9c1
//! └── job-2024-05-01T12.30-3f2a9c1/
//!     ├── id
//!     ├── results.json
//!     └── test-results/
//!         ├── 001-alias:smoke;1-9f86d081/
//!         │   ├── stdout
//!         │   ├── stderr
//!         │   └── variant.json
//!         └── ...
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use plexrun::config::Config;
//! use plexrun::executor::ProcessExecutor;
//! use plexrun::job::{Job, JobConfig};
//! use plexrun::report::NullReporter;
//! use plexrun::resolver::ResolverRegistry;
//! use plexrun::tree::ParamTreeBuilder;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let registry = Arc::new(ResolverRegistry::from_config(&config)?);
//!
//!     let mut job = Job::new(JobConfig {
//!         references: vec!["tests/smoke.sh".to_string()],
//!         timeout: Some("10m".to_string()),
//!         ..JobConfig::default()
//!     })?;
//!
//!     let tree = ParamTreeBuilder::new().source_file("params.yaml");
//!     let summary = job
//!         .run(registry, tree, &ProcessExecutor::default(), &NullReporter)
//!         .await?;
//!     std::process::exit(summary.exit_code());
//! }
//! ```

pub mod id;
pub mod plan;
pub mod status;
pub mod timeout;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::executor::{ExecutionRequest, TestExecutor, TestOutcome, TestResult};
use crate::report::Reporter;
use crate::resolver::{ReferenceResolution, ResolverRegistry};
use crate::tree::{ParamTreeBuilder, TreeError};

pub use id::JobId;
pub use plan::{ExecutionPlan, PlanEntry};
pub use status::ExitStatus;
pub use timeout::parse_timeout;

/// Errors that stop a job before or outside of test execution.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Invalid job id '{0}': expected 40 hexadecimal digits")]
    InvalidJobId(String),

    #[error("Invalid job timeout '{0}': expected a non-negative number with optional s, m, h or d suffix")]
    InvalidTimeout(String),

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error("No test references could be resolved:\n{0}")]
    NothingResolved(String),

    #[error("Failed to prepare result directory {}: {source}", .path.display())]
    ResultsDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Background task failed: {0}")]
    Task(String),

    #[error("Job already ran (state {0:?})")]
    AlreadyRun(JobState),
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Created,
    Resolving,
    Planning,
    Running,
    Completed,
    TimedOut,
    Aborted,
}

/// User facing job settings, validated by [`Job::new`].
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Test references, resolved in order.
    pub references: Vec<String>,

    /// Forced job id; a random one is generated when `None`.
    pub job_id: Option<String>,

    /// Parent directory of job result directories.
    pub results_dir: PathBuf,

    /// Global timeout, e.g. `30m`. `None` or `0` means unlimited.
    pub timeout: Option<String>,

    /// Maximum number of entries running at once.
    pub max_parallel: usize,

    /// Time limit of each entry.
    pub test_timeout: Option<Duration>,

    /// How long a cancelled entry may take to stop before it is dropped.
    pub stop_grace: Duration,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            references: Vec::new(),
            job_id: None,
            results_dir: PathBuf::from("job-results"),
            timeout: None,
            max_parallel: 1,
            test_timeout: None,
            stop_grace: Duration::from_secs(5),
        }
    }
}

/// Final report of a job, also written to `results.json`.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub job_id: JobId,
    pub state: JobState,
    pub status: ExitStatus,
    pub logdir: PathBuf,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub skipped: usize,
    pub interrupted: usize,
    pub duration: Duration,

    /// Unresolved references first, then plan entries in plan order.
    pub results: Vec<TestResult>,
}

impl JobSummary {
    fn new(
        job_id: JobId,
        state: JobState,
        logdir: PathBuf,
        duration: Duration,
        results: Vec<TestResult>,
    ) -> Self {
        let count = |outcome: TestOutcome| results.iter().filter(|r| r.outcome == outcome).count();

        let mut status = ExitStatus::aggregate(&results);
        if state != JobState::Completed {
            status |= ExitStatus::JOB_ERROR;
        }

        Self {
            job_id,
            state,
            status,
            logdir,
            total: results.len(),
            passed: count(TestOutcome::Passed),
            failed: count(TestOutcome::Failed),
            errors: count(TestOutcome::Error),
            skipped: count(TestOutcome::Skipped),
            interrupted: count(TestOutcome::Interrupted),
            duration,
            results,
        }
    }

    pub fn success(&self) -> bool {
        self.status.is_ok()
    }

    pub fn exit_code(&self) -> i32 {
        self.status.code()
    }
}

/// A single supervised run.
#[derive(Debug)]
pub struct Job {
    id: JobId,
    references: Vec<String>,
    results_dir: PathBuf,
    timeout: Option<Duration>,
    max_parallel: usize,
    test_timeout: Option<Duration>,
    stop_grace: Duration,
    state: JobState,
    abort: CancellationToken,
    logdir: Option<PathBuf>,
}

impl Job {
    /// Validates the settings and creates a job in the `CREATED` state.
    pub fn new(config: JobConfig) -> Result<Self, JobError> {
        let id = JobId::parse_or_generate(config.job_id.as_deref())?;
        let timeout = match config.timeout.as_deref() {
            Some(value) => parse_timeout(value)?,
            None => None,
        };

        Ok(Self {
            id,
            references: config.references,
            results_dir: config.results_dir,
            timeout,
            max_parallel: config.max_parallel.max(1),
            test_timeout: config.test_timeout.filter(|d| !d.is_zero()),
            stop_grace: config.stop_grace,
            state: JobState::Created,
            abort: CancellationToken::new(),
            logdir: None,
        })
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Result directory, once created.
    pub fn logdir(&self) -> Option<&Path> {
        self.logdir.as_deref()
    }

    /// Token that aborts the job when cancelled.
    pub fn abort_handle(&self) -> CancellationToken {
        self.abort.clone()
    }

    /// Resolves, plans and executes the job.
    ///
    /// Returns `Err` only for fatal setup failures; test failures are part
    /// of the returned summary.
    pub async fn run<E, R>(
        &mut self,
        registry: Arc<ResolverRegistry>,
        tree: ParamTreeBuilder,
        executor: &E,
        reporter: &R,
    ) -> Result<JobSummary, JobError>
    where
        E: TestExecutor,
        R: Reporter,
    {
        if self.state != JobState::Created {
            return Err(JobError::AlreadyRun(self.state));
        }
        let start = Instant::now();

        self.state = JobState::Resolving;
        let references = self.references.clone();
        let resolving = tokio::task::spawn_blocking(move || registry.resolve_all(&references));
        let loading = tokio::task::spawn_blocking(move || tree.build());
        let (resolved, tree) = tokio::join!(resolving, loading);
        let resolved = resolved.map_err(|e| JobError::Task(e.to_string()))?;
        let tree = tree.map_err(|e| JobError::Task(e.to_string()))??;

        let mut unresolved = Vec::new();
        let mut resolutions = Vec::new();
        for result in resolved {
            if result.is_success() {
                debug!(
                    "Resolved {} to {} test(s)",
                    result.reference,
                    result.resolutions.len()
                );
                resolutions.extend(result.resolutions);
            } else {
                warn!("Unresolved reference {}", result.describe());
                unresolved.push(result);
            }
        }
        if resolutions.is_empty() {
            let reasons: Vec<String> = unresolved.iter().map(|r| format!("  {}", r.describe())).collect();
            return Err(JobError::NothingResolved(reasons.join("\n")));
        }

        self.state = JobState::Planning;
        let plan = ExecutionPlan::new(resolutions, &tree);
        info!(
            "Planned {} test(s) x {} variant(s) = {} entries",
            plan.resolutions().len(),
            plan.variant_count(),
            plan.len()
        );

        let logdir = self.create_logdir()?;
        let tests_dir = logdir.join("test-results");
        std::fs::create_dir_all(&tests_dir).map_err(|source| JobError::ResultsDir {
            path: tests_dir.clone(),
            source,
        })?;
        self.logdir = Some(logdir.clone());

        self.state = JobState::Running;
        reporter
            .on_plan_ready(self.id.as_str(), &logdir, plan.len() + unresolved.len())
            .await;

        let mut results: Vec<TestResult> = Vec::with_capacity(plan.len() + unresolved.len());
        for reference in &unresolved {
            let result = unresolved_result(reference);
            reporter.on_test_complete(&result).await;
            results.push(result);
        }

        let run_token = self.abort.child_token();
        let timed_out = Arc::new(AtomicBool::new(false));
        // The budget counts from job start, so setup time is already spent.
        let watchdog = self.timeout.map(|limit| {
            let remaining = limit.saturating_sub(start.elapsed());
            let token = run_token.clone();
            let flag = Arc::clone(&timed_out);
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(remaining) => {
                        warn!("Job timeout of {:?} reached, interrupting remaining tests", limit);
                        flag.store(true, Ordering::SeqCst);
                        token.cancel();
                    }
                    _ = token.cancelled() => {}
                }
            })
        });

        let slots: Vec<OnceLock<TestResult>> = (0..plan.len()).map(|_| OnceLock::new()).collect();
        let runner = EntryRunner {
            job_id: self.id.as_str(),
            tests_dir: &tests_dir,
            executor,
            reporter,
            cancel: &run_token,
            test_timeout: self.test_timeout,
            stop_grace: self.stop_grace,
        };

        stream::iter(plan.entries(&tree))
            .map(|entry| runner.run(entry))
            .buffer_unordered(self.max_parallel)
            .for_each(|(index, result)| {
                let slots = &slots;
                async move {
                    reporter.on_test_complete(&result).await;
                    match slots.get(index) {
                        Some(slot) => {
                            if slot.set(result).is_err() {
                                error!("Result for plan entry {} was already recorded", index + 1);
                            }
                        }
                        None => error!("Plan entry {} is out of range", index + 1),
                    }
                }
            })
            .await;

        if let Some(watchdog) = watchdog {
            watchdog.abort();
        }

        self.state = if timed_out.load(Ordering::SeqCst) {
            JobState::TimedOut
        } else if self.abort.is_cancelled() {
            JobState::Aborted
        } else {
            JobState::Completed
        };

        results.extend(slots.into_iter().filter_map(OnceLock::into_inner));
        let summary = JobSummary::new(
            self.id.clone(),
            self.state,
            logdir.clone(),
            start.elapsed(),
            results,
        );
        info!(
            "Job {} finished: {:?}, exit status {}",
            self.id, self.state, summary.status
        );

        write_summary(&logdir, &summary);
        reporter.on_job_complete(&summary).await;
        Ok(summary)
    }

    /// Creates `<results_dir>/job-<timestamp>-<short id>` with its `id` file.
    fn create_logdir(&self) -> Result<PathBuf, JobError> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| JobError::ResultsDir { path, source }
        };

        std::fs::create_dir_all(&self.results_dir).map_err(io_err(self.results_dir.as_path()))?;

        let stamp = chrono::Local::now().format("%Y-%m-%dT%H.%M");
        let base = format!("job-{}-{}", stamp, self.id.short());
        let mut name = base.clone();
        let mut suffix = 0;
        while self.results_dir.join(&name).exists() {
            suffix += 1;
            name = format!("{}.{}", base, suffix);
        }

        let logdir = self.results_dir.join(&name);
        std::fs::create_dir(&logdir).map_err(io_err(logdir.as_path()))?;
        std::fs::write(logdir.join("id"), format!("{}\n", self.id))
            .map_err(io_err(logdir.as_path()))?;
        update_latest_link(&self.results_dir, &name);
        info!("Job results in {}", logdir.display());
        Ok(logdir)
    }
}

/// Runs plan entries against an executor.
struct EntryRunner<'a, E, R> {
    job_id: &'a str,
    tests_dir: &'a Path,
    executor: &'a E,
    reporter: &'a R,
    cancel: &'a CancellationToken,
    test_timeout: Option<Duration>,
    stop_grace: Duration,
}

impl<E, R> EntryRunner<'_, E, R>
where
    E: TestExecutor,
    R: Reporter,
{
    async fn run(&self, entry: PlanEntry<'_>) -> (usize, TestResult) {
        let test_id = entry.test_id();
        let logdir = self.tests_dir.join(entry.dir_name());
        let base = TestResult::new(&test_id, TestOutcome::Interrupted)
            .with_uri(&entry.resolution.uri)
            .with_variant_id(entry.variant.id())
            .with_logdir(&logdir);

        if self.cancel.is_cancelled() {
            debug!("Not starting {}: job is stopping", test_id);
            return (entry.index, base.with_error("not started: job was stopped"));
        }

        if let Err(e) = std::fs::create_dir_all(&logdir) {
            return (
                entry.index,
                base.with_outcome(TestOutcome::Error)
                    .with_error(format!("cannot create {}: {}", logdir.display(), e)),
            );
        }
        match serde_json::to_string_pretty(&entry.variant) {
            Ok(json) => {
                if let Err(e) = std::fs::write(logdir.join("variant.json"), json) {
                    warn!("Failed to write variant of {}: {}", test_id, e);
                }
            }
            Err(e) => warn!("Failed to serialize variant of {}: {}", test_id, e),
        }

        self.reporter.on_test_start(&test_id).await;

        let request = ExecutionRequest {
            job_id: self.job_id,
            test_id: &test_id,
            resolution: entry.resolution,
            variant: &entry.variant,
            logdir: &logdir,
        };
        let entry_token = self.cancel.child_token();
        let start = Instant::now();

        let execution = self.executor.execute(&request, entry_token.clone());
        tokio::pin!(execution);
        let deadline = async {
            match self.test_timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);

        let mut exceeded = false;
        let finished = tokio::select! {
            result = &mut execution => Some(result),
            _ = entry_token.cancelled() => None,
            _ = &mut deadline => {
                exceeded = true;
                entry_token.cancel();
                None
            }
        };

        let finished = match finished {
            Some(result) => Some(result),
            None => match tokio::time::timeout(self.stop_grace, &mut execution).await {
                Ok(result) => Some(result),
                Err(_) => {
                    warn!("{} did not stop within {:?}, dropping it", test_id, self.stop_grace);
                    None
                }
            },
        };

        let mut result = match finished {
            Some(Ok(result)) => result,
            Some(Err(e)) => base
                .with_outcome(TestOutcome::Error)
                .with_error(e.to_string()),
            None => base.with_error("did not stop within the grace period"),
        };
        if exceeded {
            result.outcome = TestOutcome::Interrupted;
            result.error_message = Some(format!(
                "exceeded test timeout of {:?}",
                self.test_timeout.unwrap_or_default()
            ));
        }
        if result.duration.is_zero() {
            result.duration = start.elapsed();
        }
        if result.logdir.is_none() {
            result.logdir = Some(logdir.clone());
        }

        for (name, content) in [("stdout", &result.stdout), ("stderr", &result.stderr)] {
            if let Err(e) = std::fs::write(logdir.join(name), content) {
                warn!("Failed to write {} of {}: {}", name, test_id, e);
            }
        }

        debug!("{} finished: {}", test_id, result.outcome);
        (entry.index, result)
    }
}

fn unresolved_result(reference: &ReferenceResolution) -> TestResult {
    TestResult::new(&reference.reference, TestOutcome::Error)
        .with_uri(&reference.reference)
        .with_error(reference.describe())
}

fn write_summary(logdir: &Path, summary: &JobSummary) {
    let path = logdir.join("results.json");
    match serde_json::to_string_pretty(summary) {
        Ok(json) => {
            if let Err(e) = std::fs::write(&path, json) {
                error!("Failed to write {}: {}", path.display(), e);
            }
        }
        Err(e) => error!("Failed to serialize job summary: {}", e),
    }
}

#[cfg(unix)]
fn update_latest_link(results_dir: &Path, name: &str) {
    let link = results_dir.join("latest");
    if link.symlink_metadata().is_ok() {
        if let Err(e) = std::fs::remove_file(&link) {
            debug!("Cannot replace {}: {}", link.display(), e);
            return;
        }
    }
    if let Err(e) = std::os::unix::fs::symlink(name, &link) {
        debug!("Cannot create {}: {}", link.display(), e);
    }
}

#[cfg(not(unix))]
fn update_latest_link(_results_dir: &Path, _name: &str) {}
