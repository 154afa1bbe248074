//! Process exit status bits.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::Serialize;

use crate::executor::{TestOutcome, TestResult};

/// Bitmask of job outcomes, used as the process exit code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ExitStatus(u8);

impl ExitStatus {
    pub const ALL_OK: ExitStatus = ExitStatus(0);
    /// At least one test failed.
    pub const TESTS_FAIL: ExitStatus = ExitStatus(1);
    /// At least one test errored or was interrupted.
    pub const JOB_ERROR: ExitStatus = ExitStatus(2);
    /// The job could not run any test, or was misconfigured.
    pub const JOB_FAIL: ExitStatus = ExitStatus(4);

    pub fn code(self) -> i32 {
        i32::from(self.0)
    }

    pub fn contains(self, other: ExitStatus) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_ok(self) -> bool {
        self == Self::ALL_OK
    }

    /// Folds test outcomes into a status. No results at all is `JOB_FAIL`.
    pub fn aggregate<'a>(results: impl IntoIterator<Item = &'a TestResult>) -> Self {
        let mut status = Self::ALL_OK;
        let mut any = false;
        for result in results {
            any = true;
            status |= Self::from(result.outcome);
        }
        if !any {
            status |= Self::JOB_FAIL;
        }
        status
    }
}

impl From<TestOutcome> for ExitStatus {
    fn from(outcome: TestOutcome) -> Self {
        match outcome {
            TestOutcome::Passed | TestOutcome::Skipped => Self::ALL_OK,
            TestOutcome::Failed => Self::TESTS_FAIL,
            TestOutcome::Error | TestOutcome::Interrupted => Self::JOB_ERROR,
        }
    }
}

impl BitOr for ExitStatus {
    type Output = ExitStatus;

    fn bitor(self, rhs: Self) -> Self {
        ExitStatus(self.0 | rhs.0)
    }
}

impl BitOrAssign for ExitStatus {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ok() {
            return f.write_str("ALL_OK");
        }
        let names: Vec<&str> = [
            (Self::TESTS_FAIL, "TESTS_FAIL"),
            (Self::JOB_ERROR, "JOB_ERROR"),
            (Self::JOB_FAIL, "JOB_FAIL"),
        ]
        .into_iter()
        .filter(|(bit, _)| self.contains(*bit))
        .map(|(_, name)| name)
        .collect();
        f.write_str(&names.join("|"))
    }
}
