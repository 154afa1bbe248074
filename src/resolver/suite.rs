//! Suite resolver.
//!
//! A suite is a TOML file named `*.suite.toml` declaring several named
//! tests. Each test becomes one resolution, in declaration order:
//!
//! ```toml
//! [[tests]]
//! name = "ping"
//! command = "ping -c1 localhost"
//!
//! [[tests]]
//! name = "dns"
//! command = "./check-dns.sh"
//! ```
//!
//! A reference may select a single test with `<file>:<name>`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::{ReferenceResolution, Resolution, Resolver};

pub const KIND: &str = "suite";
const SUFFIX: &str = ".suite.toml";

#[derive(Debug, Deserialize)]
struct SuiteFile {
    #[serde(default)]
    tests: Vec<SuiteTest>,
}

#[derive(Debug, Deserialize)]
struct SuiteTest {
    name: String,
    command: String,
}

/// Resolves suite files into their declared tests.
#[derive(Debug, Default)]
pub struct SuiteResolver;

impl SuiteResolver {
    pub fn new() -> Self {
        Self
    }
}

/// Splits `file.suite.toml:name` into the file and the selected test.
fn split_selector(reference: &str) -> (&str, Option<&str>) {
    if let Some(idx) = reference.rfind(':') {
        let (file, name) = (&reference[..idx], &reference[idx + 1..]);
        if file.ends_with(SUFFIX) && !name.is_empty() {
            return (file, Some(name));
        }
    }
    (reference, None)
}

impl Resolver for SuiteResolver {
    fn name(&self) -> &str {
        KIND
    }

    fn resolve(&self, reference: &str) -> ReferenceResolution {
        let (file, selector) = split_selector(reference);

        if !file.ends_with(SUFFIX) {
            return ReferenceResolution::not_found(reference, KIND, "not a suite file");
        }
        let path = Path::new(file);
        if !path.is_file() {
            return ReferenceResolution::not_found(reference, KIND, "file does not exist");
        }

        let path: PathBuf = match path.canonicalize() {
            Ok(p) => p,
            Err(e) => return ReferenceResolution::error(reference, KIND, e.to_string()),
        };
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => return ReferenceResolution::error(reference, KIND, e.to_string()),
        };
        let suite: SuiteFile = match toml::from_str(&content) {
            Ok(s) => s,
            Err(e) => {
                return ReferenceResolution::error(reference, KIND, format!("invalid suite: {}", e));
            }
        };

        let mut seen = HashSet::new();
        for test in &suite.tests {
            if test.name.is_empty() || test.name.contains(':') {
                return ReferenceResolution::error(
                    reference,
                    KIND,
                    format!("invalid test name '{}'", test.name),
                );
            }
            if !seen.insert(test.name.as_str()) {
                return ReferenceResolution::error(
                    reference,
                    KIND,
                    format!("duplicate test name '{}'", test.name),
                );
            }
        }

        let suite_dir = path
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_default();

        let resolutions: Vec<Resolution> = suite
            .tests
            .into_iter()
            .filter(|t| selector.is_none_or(|s| s == t.name))
            .map(|t| {
                Resolution::new(KIND, format!("{}:{}", path.display(), t.name))
                    .with_parameter("command", t.command)
                    .with_parameter("name", t.name)
                    .with_parameter("suite", path.display().to_string())
                    .with_parameter("cwd", suite_dir.clone())
            })
            .collect();

        if resolutions.is_empty() {
            let info = match selector {
                Some(name) => format!("suite has no test named '{}'", name),
                None => "suite declares no tests".to_string(),
            };
            return ReferenceResolution::not_found(reference, KIND, info);
        }

        ReferenceResolution::success(reference, KIND, resolutions)
    }
}
