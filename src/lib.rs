//! plexrun: run tests across multiplexed parameter variants.
//!
//! Given test references and parameter files, plexrun resolves the
//! references to runnable tests, expands the parameter files into
//! variants and runs every `(test, variant)` pair under a supervised job.
//!
//! # Architecture
//!
//! ```text
//!  references ──► resolver ──► Vec<Resolution> ─┐
//!                                               ├──► job ──► executor ──► TestResult
//!  YAML files ──► tree ──► variant ─────────────┘      │
//!                                                      └──► report
//! ```
//!
//! - [`tree`]: merged, filtered parameter hierarchy
//! - [`variant`]: lazy expansion of a tree into parameter sets
//! - [`resolver`]: reference resolution strategies
//! - [`job`]: identity, result directory, timeouts and exit status
//! - [`executor`]: per-test execution as child processes
//! - [`report`]: console progress and summaries
//! - [`config`]: `plexrun.toml` settings
//!
//! # Example
//!
//! ```
//! use plexrun::tree::{ParamTreeBuilder, parse_source};
//!
//! let params = parse_source(
//!     "os: !mux\n  linux:\n    distro: fedora\n  bsd:\n    distro: freebsd\n",
//!     "inline",
//! )?;
//! let tree = ParamTreeBuilder::new().source(params).build()?;
//!
//! let distros: Vec<String> = tree
//!     .variants()
//!     .map(|v| v.get("distro").and_then(|d| d.as_str()).unwrap_or_default().to_string())
//!     .collect();
//! assert_eq!(distros, vec!["fedora", "freebsd"]);
//! # Ok::<(), plexrun::tree::TreeError>(())
//! ```

pub mod config;
pub mod executor;
pub mod job;
pub mod report;
pub mod resolver;
pub mod tree;
pub mod variant;

// Re-export commonly used types
pub use config::{Config, load_config};
pub use executor::{TestExecutor, TestOutcome, TestResult};
pub use job::{ExitStatus, Job, JobConfig, JobSummary};
pub use report::Reporter;
pub use resolver::{Resolver, ResolverRegistry};
pub use tree::{ParamTree, ParamTreeBuilder};
pub use variant::Variant;
