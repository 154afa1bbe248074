//! Child process executor.
//!
//! Runs each resolution as a local child process:
//!
//! - `exec-test`: the uri is the program, run from its own directory.
//! - `suite`: the `command` parameter, split with shell quoting rules, run
//!   from the suite file's directory.
//! - `alias`: the `command` parameter, run from the current directory.
//!
//! Output is read line by line from both pipes. Each test runs in its own
//! process group. On cancellation the group receives `SIGTERM`; if the
//! future is dropped before the test finished, the group gets `SIGKILL`.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::LinesStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{
    ExecutionRequest, ExecutorError, OutputCheck, TestExecutor, TestOutcome, TestResult,
    test_environment,
};
use crate::resolver::{Resolution, alias, exec, suite};

/// Marker a test prints as its last stdout line to report a skip.
pub const SKIP_MARKER: &str = "SKIP";

enum OutputLine {
    Stdout(String),
    Stderr(String),
}

#[derive(Debug)]
struct TestCommand {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl TestCommand {
    fn for_resolution(resolution: &Resolution) -> Result<Self, ExecutorError> {
        match resolution.kind.as_str() {
            exec::KIND => Ok(Self {
                program: resolution.uri.clone(),
                args: Vec::new(),
                working_dir: PathBuf::from(&resolution.uri)
                    .parent()
                    .map(|p| p.to_path_buf()),
            }),
            suite::KIND | alias::KIND => {
                let command = resolution.parameter("command").ok_or_else(|| {
                    ExecutorError::InvalidCommand(format!("{} has no command", resolution.uri))
                })?;
                let mut words = shell_words::split(command)
                    .map_err(|e| ExecutorError::InvalidCommand(format!("{}: {}", command, e)))?
                    .into_iter();
                let program = words
                    .next()
                    .ok_or_else(|| ExecutorError::InvalidCommand("empty command".to_string()))?;
                Ok(Self {
                    program,
                    args: words.collect(),
                    working_dir: resolution.parameter("cwd").map(PathBuf::from),
                })
            }
            other => Err(ExecutorError::UnsupportedKind(other.to_string())),
        }
    }
}

/// Executor that runs tests as local child processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor {
    output_check: OutputCheck,
}

impl ProcessExecutor {
    pub fn new(output_check: OutputCheck) -> Self {
        Self { output_check }
    }
}

/// The process group of a running test.
///
/// Dropping it kills every process left in the group, unless the test
/// exited on its own.
struct ProcessGroup {
    pgid: Option<i32>,
    finished: bool,
}

impl ProcessGroup {
    fn new(pid: Option<u32>) -> Self {
        Self {
            pgid: pid.and_then(|pid| i32::try_from(pid).ok()),
            finished: false,
        }
    }

    /// Asks every process of the group to stop.
    fn terminate(&self) {
        if let Some(pgid) = self.pgid {
            signal_group(pgid, false);
        }
    }

    fn finish(&mut self) {
        self.finished = true;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        if let (Some(pgid), false) = (self.pgid, self.finished) {
            signal_group(pgid, true);
        }
    }
}

#[cfg(unix)]
fn signal_group(pgid: i32, kill: bool) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let signal = if kill { Signal::SIGKILL } else { Signal::SIGTERM };
    if let Err(e) = killpg(Pid::from_raw(pgid), signal) {
        debug!("Failed to send {:?} to process group {}: {}", signal, pgid, e);
    }
}

#[cfg(not(unix))]
fn signal_group(_pgid: i32, _kill: bool) {}

/// Outcome of a finished process, before the output check.
fn classify(success: bool, stdout: &str) -> TestOutcome {
    if !success {
        return TestOutcome::Failed;
    }
    let last = stdout.lines().rev().find(|l| !l.trim().is_empty());
    if last.map(str::trim) == Some(SKIP_MARKER) {
        TestOutcome::Skipped
    } else {
        TestOutcome::Passed
    }
}

#[async_trait]
impl TestExecutor for ProcessExecutor {
    fn name(&self) -> &str {
        "process"
    }

    async fn execute(
        &self,
        request: &ExecutionRequest<'_>,
        cancel: CancellationToken,
    ) -> Result<TestResult, ExecutorError> {
        let command = TestCommand::for_resolution(request.resolution)?;
        debug!("Running {} as {:?}", request.test_id, command);

        let mut process = tokio::process::Command::new(&command.program);
        process.args(&command.args);
        if let Some(dir) = &command.working_dir {
            process.current_dir(dir);
        }
        for (key, value) in test_environment(request) {
            process.env(key, value);
        }
        process.stdin(Stdio::null());
        process.stdout(Stdio::piped());
        process.stderr(Stdio::piped());
        process.kill_on_drop(true);
        #[cfg(unix)]
        process.process_group(0);

        let start = Instant::now();
        let mut child = process
            .spawn()
            .map_err(|e| ExecutorError::Spawn(format!("{}: {}", command.program, e)))?;
        let mut group = ProcessGroup::new(child.id());

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExecutorError::Spawn("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExecutorError::Spawn("stderr not captured".to_string()))?;

        let stdout_stream = LinesStream::new(BufReader::new(stdout).lines())
            .map(|line: Result<String, std::io::Error>| OutputLine::Stdout(line.unwrap_or_default()));
        let stderr_stream = LinesStream::new(BufReader::new(stderr).lines())
            .map(|line: Result<String, std::io::Error>| OutputLine::Stderr(line.unwrap_or_default()));
        let mut lines = stream::select(stdout_stream, stderr_stream);

        let mut stdout_buf = String::new();
        let mut stderr_buf = String::new();
        let mut interrupted = false;

        let status = {
            let collect = async {
                while let Some(line) = lines.next().await {
                    match line {
                        OutputLine::Stdout(s) => {
                            stdout_buf.push_str(&s);
                            stdout_buf.push('\n');
                        }
                        OutputLine::Stderr(s) => {
                            stderr_buf.push_str(&s);
                            stderr_buf.push('\n');
                        }
                    }
                }
                child.wait().await
            };
            tokio::pin!(collect);

            tokio::select! {
                status = &mut collect => status,
                _ = cancel.cancelled() => {
                    interrupted = true;
                    group.terminate();
                    collect.await
                }
            }
        }?;

        if !interrupted {
            group.finish();
        }

        let duration = start.elapsed();
        let result = TestResult::for_request(request, TestOutcome::Passed).with_duration(duration);

        if interrupted {
            return Ok(result
                .with_stdout(stdout_buf)
                .with_stderr(stderr_buf)
                .with_error(format!("interrupted ({})", status))
                .with_outcome(TestOutcome::Interrupted));
        }

        let mut outcome = classify(status.success(), &stdout_buf);
        let mut error = (!status.success()).then(|| format!("test exited with {}", status));

        if let Err(e) = self
            .output_check
            .record(request.resolution, &stdout_buf, &stderr_buf)
        {
            warn!("Failed to record output of {}: {}", request.test_id, e);
        }
        if outcome == TestOutcome::Passed {
            if let Some(mismatch) =
                self.output_check
                    .check(request.resolution, &stdout_buf, &stderr_buf)
            {
                outcome = TestOutcome::Failed;
                error = Some(mismatch);
            }
        }

        let mut result = result
            .with_stdout(stdout_buf)
            .with_stderr(stderr_buf)
            .with_outcome(outcome);
        if let Some(error) = error {
            result = result.with_error(error);
        }
        Ok(result)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use super::*;
    use crate::executor::RecordMode;
    use crate::tree::{ParamTree, TreeNode};
    use crate::variant::Variant;

    fn variant() -> Variant {
        let tree = ParamTree::build(
            vec![TreeNode::root().with_value("greeting", "hello")],
            &[],
            &[],
            &[],
        )
        .unwrap();
        tree.variant(0).unwrap()
    }

    fn alias(command: &str) -> Resolution {
        Resolution::new("alias", "alias:t").with_parameter("command", command)
    }

    async fn run(executor: &ProcessExecutor, resolution: &Resolution) -> TestResult {
        let variant = variant();
        let logdir = tempfile::tempdir().unwrap();
        let request = ExecutionRequest {
            job_id: "0123",
            test_id: "alias:t;1",
            resolution,
            variant: &variant,
            logdir: logdir.path(),
        };
        executor
            .execute(&request, CancellationToken::new())
            .await
            .unwrap()
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(true, "ok\n"), TestOutcome::Passed);
        assert_eq!(classify(true, "doing things\nSKIP\n\n"), TestOutcome::Skipped);
        assert_eq!(classify(false, "SKIP\n"), TestOutcome::Failed);
    }

    #[tokio::test]
    async fn test_exit_codes() {
        let executor = ProcessExecutor::default();
        assert_eq!(run(&executor, &alias("true")).await.outcome, TestOutcome::Passed);

        let failed = run(&executor, &alias("sh -c 'echo oops >&2; exit 3'")).await;
        assert_eq!(failed.outcome, TestOutcome::Failed);
        assert_eq!(failed.stderr, "oops\n");
        assert!(failed.error_message.is_some());

        let skipped = run(&executor, &alias("echo SKIP")).await;
        assert_eq!(skipped.outcome, TestOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_parameters_exported() {
        let result = run(
            &ProcessExecutor::default(),
            &alias("sh -c 'echo $PLEXRUN_PARAM_GREETING $PLEXRUN_JOB_ID'"),
        )
        .await;
        assert_eq!(result.outcome, TestOutcome::Passed);
        assert_eq!(result.stdout, "hello 0123\n");
    }

    #[tokio::test]
    async fn test_spawn_failure_is_error() {
        let variant = variant();
        let resolution = alias("/nonexistent/program");
        let request = ExecutionRequest {
            job_id: "0123",
            test_id: "alias:t;1",
            resolution: &resolution,
            variant: &variant,
            logdir: Path::new("/tmp"),
        };
        let err = ProcessExecutor::default()
            .execute(&request, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Spawn(_)));
    }

    #[tokio::test]
    async fn test_cancel_interrupts() {
        let variant = variant();
        let resolution = alias("sleep 30");
        let logdir = tempfile::tempdir().unwrap();
        let request = ExecutionRequest {
            job_id: "0123",
            test_id: "alias:t;1",
            resolution: &resolution,
            variant: &variant,
            logdir: logdir.path(),
        };

        let start = Instant::now();
        let result = ProcessExecutor::default()
            .execute(&request, cancel_after(Duration::from_millis(200)))
            .await
            .unwrap();
        assert_eq!(result.outcome, TestOutcome::Interrupted);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    fn cancel_after(delay: Duration) -> CancellationToken {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            trigger.cancel();
        });
        cancel
    }

    #[tokio::test]
    async fn test_cancel_terminates_nested_processes() {
        let variant = variant();
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("grandchild-finished");
        let resolution = alias(&format!(
            "sh -c \"sh -c 'sleep 2; touch {}'; true\"",
            marker.display()
        ));
        let request = ExecutionRequest {
            job_id: "0123",
            test_id: "alias:t;1",
            resolution: &resolution,
            variant: &variant,
            logdir: dir.path(),
        };

        let start = Instant::now();
        let result = ProcessExecutor::default()
            .execute(&request, cancel_after(Duration::from_millis(200)))
            .await
            .unwrap();
        assert_eq!(result.outcome, TestOutcome::Interrupted);
        assert!(start.elapsed() < Duration::from_millis(1500));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_dropped_execution_kills_process_group() {
        let variant = variant();
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("survivor-finished");
        let resolution = alias(&format!(
            "sh -c \"trap '' TERM; sleep 2; touch {}\"",
            marker.display()
        ));
        let request = ExecutionRequest {
            job_id: "0123",
            test_id: "alias:t;1",
            resolution: &resolution,
            variant: &variant,
            logdir: dir.path(),
        };

        let executor = ProcessExecutor::default();
        let execution = executor.execute(&request, cancel_after(Duration::from_millis(200)));
        let outcome = tokio::time::timeout(Duration::from_millis(600), execution).await;
        assert!(outcome.is_err(), "SIGTERM is ignored, so the test must still be running");

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_suite_output_check() {
        let dir = tempfile::tempdir().unwrap();
        let suite_file = dir.path().join("out.suite.toml");
        let resolution = Resolution::new("suite", format!("{}:greet", suite_file.display()))
            .with_parameter("command", "echo hello")
            .with_parameter("name", "greet")
            .with_parameter("suite", suite_file.display().to_string())
            .with_parameter("cwd", dir.path().display().to_string());

        let recorder = ProcessExecutor::new(OutputCheck {
            enabled: true,
            record: RecordMode::All,
        });
        assert_eq!(run(&recorder, &resolution).await.outcome, TestOutcome::Passed);
        let expected = dir.path().join("out.suite.toml.data/greet/stdout.expected");
        assert_eq!(std::fs::read_to_string(&expected).unwrap(), "hello\n");

        std::fs::write(&expected, "goodbye\n").unwrap();
        let checked = run(&ProcessExecutor::default(), &resolution).await;
        assert_eq!(checked.outcome, TestOutcome::Failed);

        let unchecked = ProcessExecutor::new(OutputCheck {
            enabled: false,
            record: RecordMode::None,
        });
        assert_eq!(run(&unchecked, &resolution).await.outcome, TestOutcome::Passed);
    }
}
