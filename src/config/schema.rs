//! Configuration schema.
//!
//! ```text
//! Config (root)
//! ├── JobSettings          - [job]: result directory, parallelism, timeouts
//! ├── ResolverSettings     - [resolvers]: strategy order
//! ├── aliases              - [aliases]: name -> command line
//! └── OutputCheckSettings  - [output_check]: reference output handling
//! ```
//!
//! Every section is optional; an empty file is a valid configuration.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::executor::{OutputCheck, RecordMode};

/// Root configuration structure.
///
/// # TOML Structure
///
/// ```toml
/// [job]
/// results_dir = "~/plexrun/job-results"
/// max_parallel = 4
/// test_timeout_secs = 600
///
/// [resolvers]
/// order = ["alias", "suite", "exec-test"]
///
/// [aliases]
/// smoke = "./scripts/smoke.sh --quick"
///
/// [output_check]
/// enabled = true
/// record = "none"
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub job: JobSettings,

    #[serde(default)]
    pub resolvers: ResolverSettings,

    /// Named command lines usable as test references.
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,

    #[serde(default)]
    pub output_check: OutputCheckSettings,
}

/// Job defaults, overridable from the command line.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JobSettings {
    /// Parent directory of job result directories. `~` and environment
    /// variables are expanded.
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,

    /// Maximum number of plan entries running at once.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Time limit of each plan entry in seconds; 0 disables it.
    #[serde(default)]
    pub test_timeout_secs: u64,

    /// Seconds a cancelled test may take to stop before it is killed.
    #[serde(default = "default_stop_grace")]
    pub stop_grace_secs: u64,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            results_dir: default_results_dir(),
            max_parallel: default_max_parallel(),
            test_timeout_secs: 0,
            stop_grace_secs: default_stop_grace(),
        }
    }
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("~/plexrun/job-results")
}

fn default_max_parallel() -> usize {
    1
}

fn default_stop_grace() -> u64 {
    5
}

/// Resolver strategy selection.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResolverSettings {
    /// Strategies in priority order.
    #[serde(default = "default_resolver_order")]
    pub order: Vec<String>,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            order: default_resolver_order(),
        }
    }
}

fn default_resolver_order() -> Vec<String> {
    ["alias", "suite", "exec-test"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Reference output handling.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputCheckSettings {
    /// Compare output with recorded references.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Streams to record as new references.
    #[serde(default)]
    pub record: RecordMode,
}

impl Default for OutputCheckSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            record: RecordMode::None,
        }
    }
}

impl From<&OutputCheckSettings> for OutputCheck {
    fn from(settings: &OutputCheckSettings) -> Self {
        OutputCheck {
            enabled: settings.enabled,
            record: settings.record,
        }
    }
}

fn default_true() -> bool {
    true
}
