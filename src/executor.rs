//! Per-test execution.
//!
//! The job controller hands every plan entry to a [`TestExecutor`], which
//! runs one resolution under one variant and reports a [`TestResult`].
//!
//! # Process Contract
//!
//! [`ProcessExecutor`] runs tests as child processes:
//!
//! | Process behavior | Outcome |
//! |------------------|---------|
//! | exit 0 | `PASS` |
//! | exit 0, last stdout line `SKIP` | `SKIP` |
//! | any other exit | `FAIL` |
//! | cannot be spawned | `ERROR` |
//! | cancelled | `INTERRUPTED` |
//!
//! Variant parameters are exported as `PLEXRUN_PARAM_<KEY>` environment
//! variables, see [`param_env_name`].

pub mod output_check;
pub mod process;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::resolver::Resolution;
use crate::variant::Variant;

pub use output_check::{OutputCheck, RecordMode};
pub use process::ProcessExecutor;

/// Errors that prevent a test from producing an outcome.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("Failed to spawn test: {0}")]
    Spawn(String),

    #[error("Unsupported resolution kind '{0}'")]
    UnsupportedKind(String),

    #[error("Invalid test command: {0}")]
    InvalidCommand(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The outcome of one plan entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TestOutcome {
    #[serde(rename = "PASS")]
    Passed,

    #[serde(rename = "FAIL")]
    Failed,

    /// The test could not run to completion.
    #[serde(rename = "ERROR")]
    Error,

    #[serde(rename = "SKIP")]
    Skipped,

    /// The test was stopped, or never started, because the job was
    /// timed out or aborted, or it exceeded its own time limit.
    #[serde(rename = "INTERRUPTED")]
    Interrupted,
}

impl TestOutcome {
    /// `Passed` and `Skipped` do not affect the exit status.
    pub fn is_success(&self) -> bool {
        matches!(self, TestOutcome::Passed | TestOutcome::Skipped)
    }
}

impl std::fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TestOutcome::Passed => "PASS",
            TestOutcome::Failed => "FAIL",
            TestOutcome::Error => "ERROR",
            TestOutcome::Skipped => "SKIP",
            TestOutcome::Interrupted => "INTERRUPTED",
        };
        f.write_str(s)
    }
}

/// Result of executing one plan entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    /// Plan entry identifier, `<uri>;<variant id>`.
    pub test_id: String,

    pub uri: String,

    /// Empty for references that never resolved.
    pub variant_id: String,

    pub outcome: TestOutcome,

    /// Wall-clock time the test took to execute.
    pub duration: Duration,

    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub stdout: String,

    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub stderr: String,

    /// Human-readable reason for non-passing outcomes.
    pub error_message: Option<String>,

    /// Result subdirectory of this entry.
    pub logdir: Option<PathBuf>,
}

impl TestResult {
    pub fn new(test_id: impl Into<String>, outcome: TestOutcome) -> Self {
        Self {
            test_id: test_id.into(),
            uri: String::new(),
            variant_id: String::new(),
            outcome,
            duration: Duration::ZERO,
            stdout: String::new(),
            stderr: String::new(),
            error_message: None,
            logdir: None,
        }
    }

    /// Creates a result for a request, copying its identifiers.
    pub fn for_request(request: &ExecutionRequest<'_>, outcome: TestOutcome) -> Self {
        Self::new(request.test_id, outcome)
            .with_uri(&request.resolution.uri)
            .with_variant_id(request.variant.id())
            .with_logdir(request.logdir)
    }

    pub fn with_outcome(mut self, outcome: TestOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = uri.into();
        self
    }

    pub fn with_variant_id(mut self, variant_id: impl Into<String>) -> Self {
        self.variant_id = variant_id.into();
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }

    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = stderr.into();
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn with_logdir(mut self, logdir: impl Into<PathBuf>) -> Self {
        self.logdir = Some(logdir.into());
        self
    }
}

/// Everything an executor needs to run one plan entry.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionRequest<'a> {
    pub job_id: &'a str,
    pub test_id: &'a str,
    pub resolution: &'a Resolution,
    pub variant: &'a Variant,

    /// Existing, exclusive result subdirectory for this entry.
    pub logdir: &'a Path,
}

/// Runs single plan entries.
///
/// Implementations must react to `cancel` by stopping the test and
/// returning an `Interrupted` result. The caller drops the future if
/// that does not happen within its grace period.
#[async_trait]
pub trait TestExecutor: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(
        &self,
        request: &ExecutionRequest<'_>,
        cancel: CancellationToken,
    ) -> Result<TestResult, ExecutorError>;
}

/// Environment variable name for a variant parameter.
///
/// ```
/// assert_eq!(plexrun::executor::param_env_name("cpu.count"), "PLEXRUN_PARAM_CPU_COUNT");
/// ```
pub fn param_env_name(key: &str) -> String {
    let key: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("PLEXRUN_PARAM_{}", key)
}

/// Renders a parameter value for the environment.
///
/// Scalars are written plainly, sequences and mappings as JSON.
pub fn param_env_value(value: &serde_yaml::Value) -> String {
    use serde_yaml::Value;
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Tagged(tagged) => param_env_value(&tagged.value),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// Environment exported to a test process for a request.
pub fn test_environment(request: &ExecutionRequest<'_>) -> Vec<(String, String)> {
    let mut env: Vec<(String, String)> = request
        .variant
        .params()
        .iter()
        .map(|p| (param_env_name(&p.key), param_env_value(&p.value)))
        .collect();
    env.push(("PLEXRUN_JOB_ID".to_string(), request.job_id.to_string()));
    env.push(("PLEXRUN_TEST_URI".to_string(), request.resolution.uri.clone()));
    env.push(("PLEXRUN_VARIANT_ID".to_string(), request.variant.id().to_string()));
    env.push((
        "PLEXRUN_TEST_LOGDIR".to_string(),
        request.logdir.display().to_string(),
    ));
    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{ParamTree, TreeNode};

    #[test]
    fn test_outcome_display_and_success() {
        assert_eq!(TestOutcome::Passed.to_string(), "PASS");
        assert_eq!(TestOutcome::Interrupted.to_string(), "INTERRUPTED");
        assert!(TestOutcome::Skipped.is_success());
        assert!(!TestOutcome::Interrupted.is_success());
        assert_eq!(serde_json::to_string(&TestOutcome::Failed).unwrap(), "\"FAIL\"");
    }

    #[test]
    fn test_param_env_name() {
        assert_eq!(param_env_name("timeout"), "PLEXRUN_PARAM_TIMEOUT");
        assert_eq!(param_env_name("cpu-count"), "PLEXRUN_PARAM_CPU_COUNT");
    }

    #[test]
    fn test_param_env_value() {
        assert_eq!(param_env_value(&serde_yaml::Value::from(60)), "60");
        assert_eq!(param_env_value(&serde_yaml::Value::from("x86")), "x86");
        let seq: serde_yaml::Value = serde_yaml::from_str("[1, 2]").unwrap();
        assert_eq!(param_env_value(&seq), "[1,2]");
    }

    #[test]
    fn test_environment_contains_identifiers() {
        let tree = ParamTree::build(
            vec![TreeNode::root().with_value("distro", "fedora")],
            &[],
            &[],
            &[],
        )
        .unwrap();
        let variant = tree.variant(0).unwrap();
        let resolution = Resolution::new("alias", "alias:smoke");
        let request = ExecutionRequest {
            job_id: "abc",
            test_id: "alias:smoke;1-deadbeef",
            resolution: &resolution,
            variant: &variant,
            logdir: Path::new("/tmp/x"),
        };

        let env = test_environment(&request);
        let lookup = |k: &str| env.iter().find(|(key, _)| key == k).map(|(_, v)| v.as_str());
        assert_eq!(lookup("PLEXRUN_PARAM_DISTRO"), Some("fedora"));
        assert_eq!(lookup("PLEXRUN_JOB_ID"), Some("abc"));
        assert_eq!(lookup("PLEXRUN_TEST_URI"), Some("alias:smoke"));
        assert_eq!(lookup("PLEXRUN_VARIANT_ID"), Some(variant.id()));
        assert_eq!(lookup("PLEXRUN_TEST_LOGDIR"), Some("/tmp/x"));
    }
}
