//! Recording and checking of expected test output.
//!
//! Reference files live next to the test:
//!
//! | Kind | Reference directory |
//! |------|---------------------|
//! | `exec-test` | `<test>.data/` |
//! | `suite` | `<suite file>.data/<test name>/` |
//! | `alias` | none, never checked |
//!
//! Each directory may hold `stdout.expected` and `stderr.expected`.

use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::resolver::{Resolution, exec, suite};

pub const STDOUT_EXPECTED: &str = "stdout.expected";
pub const STDERR_EXPECTED: &str = "stderr.expected";

/// Which captured streams to record as the new reference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RecordMode {
    #[default]
    None,
    All,
    Stdout,
    Stderr,
}

impl RecordMode {
    fn records_stdout(self) -> bool {
        matches!(self, RecordMode::All | RecordMode::Stdout)
    }

    fn records_stderr(self) -> bool {
        matches!(self, RecordMode::All | RecordMode::Stderr)
    }
}

/// Output check behavior for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputCheck {
    /// Compare captured streams with existing reference files.
    pub enabled: bool,
    pub record: RecordMode,
}

impl Default for OutputCheck {
    fn default() -> Self {
        Self {
            enabled: true,
            record: RecordMode::None,
        }
    }
}

/// Returns the reference directory for a resolution, if its kind has one.
pub fn reference_dir(resolution: &Resolution) -> Option<PathBuf> {
    match resolution.kind.as_str() {
        exec::KIND => Some(PathBuf::from(format!("{}.data", resolution.uri))),
        suite::KIND => {
            let file = resolution.parameter("suite")?;
            let name = resolution.parameter("name")?;
            Some(PathBuf::from(format!("{}.data", file)).join(name))
        }
        _ => None,
    }
}

impl OutputCheck {
    /// Writes the captured streams selected by the record mode.
    pub fn record(
        &self,
        resolution: &Resolution,
        stdout: &str,
        stderr: &str,
    ) -> std::io::Result<()> {
        if self.record == RecordMode::None {
            return Ok(());
        }
        let Some(dir) = reference_dir(resolution) else {
            debug!("No reference directory for {}, not recording", resolution.uri);
            return Ok(());
        };

        std::fs::create_dir_all(&dir)?;
        if self.record.records_stdout() {
            std::fs::write(dir.join(STDOUT_EXPECTED), stdout)?;
        }
        if self.record.records_stderr() {
            std::fs::write(dir.join(STDERR_EXPECTED), stderr)?;
        }
        Ok(())
    }

    /// Compares the captured streams with the reference files.
    ///
    /// Returns a description of the first mismatch. Missing reference
    /// files are not a mismatch.
    pub fn check(&self, resolution: &Resolution, stdout: &str, stderr: &str) -> Option<String> {
        if !self.enabled {
            return None;
        }
        let dir = reference_dir(resolution)?;

        for (name, actual) in [(STDOUT_EXPECTED, stdout), (STDERR_EXPECTED, stderr)] {
            if let Some(expected) = read_reference(&dir.join(name)) {
                if expected != actual {
                    return Some(format!(
                        "output does not match {}",
                        dir.join(name).display()
                    ));
                }
            }
        }
        None
    }
}

fn read_reference(path: &Path) -> Option<String> {
    std::fs::read_to_string(path).ok()
}
