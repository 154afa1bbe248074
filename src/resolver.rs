//! Reference resolution.
//!
//! Maps user supplied test references (paths, aliases, container files) to
//! concrete [`Resolution`]s that an executor knows how to run.
//!
//! # Architecture
//!
//! ```text
//!  "tests/net.suite.toml"
//!          │
//!          ▼
//!  ResolverRegistry ── alias ──► NotFound
//!                   ── suite ──► Success [ net.suite.toml:ping, net.suite.toml:dns ]
//!                   ── exec-test   (not tried: first Success or Error wins)
//! ```
//!
//! Strategies implement the [`Resolver`] trait and are registered
//! explicitly, in priority order, in a [`ResolverRegistry`].
//!
//! # Built-in Strategies
//!
//! | Name | Module | Resolves |
//! |------|--------|----------|
//! | `alias` | [`alias`] | names from the `[aliases]` settings table |
//! | `suite` | [`suite`] | `*.suite.toml` files with named sub-tests |
//! | `exec-test` | [`exec`] | executable files |

pub mod alias;
pub mod exec;
pub mod suite;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;

pub use alias::AliasResolver;
pub use exec::ExecTestResolver;
pub use suite::SuiteResolver;

/// Errors configuring the resolver registry.
#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    /// The settings name a strategy that does not exist.
    #[error("Unknown resolver '{0}' (available: alias, suite, exec-test)")]
    UnknownResolver(String),

    /// No strategy is registered.
    #[error("No resolvers configured")]
    Empty,
}

/// Outcome of resolving one reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionStatus {
    Success,
    NotFound,
    Error,
}

impl std::fmt::Display for ResolutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResolutionStatus::Success => "SUCCESS",
            ResolutionStatus::NotFound => "NOTFOUND",
            ResolutionStatus::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// One concrete, runnable test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// Tag identifying the executor adapter (`exec-test`, `suite`, ...).
    pub kind: String,

    /// Fully qualified locator, unique within a run.
    pub uri: String,

    /// Adapter specific parameters.
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl Resolution {
    pub fn new(kind: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            uri: uri.into(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }
}

/// The result of resolving one reference.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferenceResolution {
    pub reference: String,
    pub status: ResolutionStatus,

    /// Resolutions in declaration order, non-empty only on success.
    pub resolutions: Vec<Resolution>,

    /// Name of the strategy that produced this result.
    ///
    /// `None` when no strategy recognized the reference.
    pub origin: Option<String>,

    /// Human readable detail for `NotFound` and `Error`.
    pub info: Option<String>,
}

impl ReferenceResolution {
    pub fn success(reference: &str, origin: &str, resolutions: Vec<Resolution>) -> Self {
        Self {
            reference: reference.to_string(),
            status: ResolutionStatus::Success,
            resolutions,
            origin: Some(origin.to_string()),
            info: None,
        }
    }

    pub fn not_found(reference: &str, origin: &str, info: impl Into<String>) -> Self {
        Self {
            reference: reference.to_string(),
            status: ResolutionStatus::NotFound,
            resolutions: Vec::new(),
            origin: Some(origin.to_string()),
            info: Some(info.into()),
        }
    }

    pub fn error(reference: &str, origin: &str, info: impl Into<String>) -> Self {
        Self {
            reference: reference.to_string(),
            status: ResolutionStatus::Error,
            resolutions: Vec::new(),
            origin: Some(origin.to_string()),
            info: Some(info.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResolutionStatus::Success
    }

    /// One-line description naming the reference, strategy and reason.
    pub fn describe(&self) -> String {
        match (&self.origin, &self.info) {
            (Some(origin), Some(info)) => {
                format!("{} [{} by {}]: {}", self.reference, self.status, origin, info)
            }
            (None, Some(info)) => format!("{} [{}]: {}", self.reference, self.status, info),
            (Some(origin), None) => format!("{} [{} by {}]", self.reference, self.status, origin),
            (None, None) => format!("{} [{}]", self.reference, self.status),
        }
    }
}

/// A strategy that turns a reference into resolutions.
///
/// Implementations must be deterministic: the same reference on the same
/// filesystem resolves to the same resolutions in the same order.
pub trait Resolver: Send + Sync {
    /// Name used in settings and diagnostics.
    fn name(&self) -> &str;

    /// Attempts to resolve `reference`.
    ///
    /// Return `NotFound` when the reference is not something this strategy
    /// handles, and `Error` when it is but resolution failed.
    fn resolve(&self, reference: &str) -> ReferenceResolution;
}

/// Tries `resolvers` in order and returns the first `Success` or `Error`.
///
/// If every strategy reports `NotFound`, the combined result lists each
/// strategy's reason.
pub fn resolve(reference: &str, resolvers: &[Box<dyn Resolver>]) -> ReferenceResolution {
    let mut reasons = Vec::new();
    for resolver in resolvers {
        let result = resolver.resolve(reference);
        debug!(
            "Resolver {} returned {} for '{}'",
            resolver.name(),
            result.status,
            reference
        );
        match result.status {
            ResolutionStatus::Success | ResolutionStatus::Error => return result,
            ResolutionStatus::NotFound => reasons.push(format!(
                "{}: {}",
                resolver.name(),
                result.info.as_deref().unwrap_or("not found")
            )),
        }
    }

    ReferenceResolution {
        reference: reference.to_string(),
        status: ResolutionStatus::NotFound,
        resolutions: Vec::new(),
        origin: None,
        info: Some(if reasons.is_empty() {
            "no resolvers available".to_string()
        } else {
            format!("not found by any resolver ({})", reasons.join("; "))
        }),
    }
}

/// An ordered set of resolver strategies.
#[derive(Default)]
pub struct ResolverRegistry {
    resolvers: Vec<Box<dyn Resolver>>,
}

impl ResolverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a strategy with the lowest priority so far.
    pub fn with_resolver<R: Resolver + 'static>(mut self, resolver: R) -> Self {
        self.resolvers.push(Box::new(resolver));
        self
    }

    /// Registers the built-in strategies in the order given by the settings.
    pub fn from_config(config: &Config) -> Result<Self, ResolverError> {
        let mut registry = Self::new();
        for name in &config.resolvers.order {
            registry = match name.as_str() {
                "alias" => registry.with_resolver(AliasResolver::new(config.aliases.clone())),
                "suite" => registry.with_resolver(SuiteResolver::new()),
                "exec-test" => registry.with_resolver(ExecTestResolver::new()),
                other => return Err(ResolverError::UnknownResolver(other.to_string())),
            };
        }
        if registry.is_empty() {
            return Err(ResolverError::Empty);
        }
        Ok(registry)
    }

    pub fn names(&self) -> Vec<&str> {
        self.resolvers.iter().map(|r| r.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }

    pub fn resolve(&self, reference: &str) -> ReferenceResolution {
        resolve(reference, &self.resolvers)
    }

    /// Resolves every reference, preserving input order.
    pub fn resolve_all(&self, references: &[String]) -> Vec<ReferenceResolution> {
        references.iter().map(|r| self.resolve(r)).collect()
    }
}

impl std::fmt::Debug for ResolverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverRegistry")
            .field("resolvers", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        name: &'static str,
        status: ResolutionStatus,
    }

    impl Resolver for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn resolve(&self, reference: &str) -> ReferenceResolution {
            match self.status {
                ResolutionStatus::Success => ReferenceResolution::success(
                    reference,
                    self.name,
                    vec![Resolution::new(self.name, format!("{}:{}", self.name, reference))],
                ),
                ResolutionStatus::NotFound => {
                    ReferenceResolution::not_found(reference, self.name, "nope")
                }
                ResolutionStatus::Error => {
                    ReferenceResolution::error(reference, self.name, "broken")
                }
            }
        }
    }

    fn fixed(name: &'static str, status: ResolutionStatus) -> Fixed {
        Fixed { name, status }
    }

    #[test]
    fn test_first_success_wins() {
        let registry = ResolverRegistry::new()
            .with_resolver(fixed("a", ResolutionStatus::NotFound))
            .with_resolver(fixed("b", ResolutionStatus::Success))
            .with_resolver(fixed("c", ResolutionStatus::Success));

        let result = registry.resolve("ref");
        assert_eq!(result.status, ResolutionStatus::Success);
        assert_eq!(result.origin.as_deref(), Some("b"));
        assert_eq!(result.resolutions[0].uri, "b:ref");
    }

    #[test]
    fn test_error_short_circuits() {
        let registry = ResolverRegistry::new()
            .with_resolver(fixed("a", ResolutionStatus::Error))
            .with_resolver(fixed("b", ResolutionStatus::Success));

        let result = registry.resolve("ref");
        assert_eq!(result.status, ResolutionStatus::Error);
        assert_eq!(result.origin.as_deref(), Some("a"));
        assert!(result.describe().contains("ERROR by a"));
    }

    #[test]
    fn test_all_not_found() {
        let registry = ResolverRegistry::new()
            .with_resolver(fixed("a", ResolutionStatus::NotFound))
            .with_resolver(fixed("b", ResolutionStatus::NotFound));

        let result = registry.resolve("ref");
        assert_eq!(result.status, ResolutionStatus::NotFound);
        assert!(result.origin.is_none());
        let info = result.info.unwrap();
        assert!(info.contains("a: nope"));
        assert!(info.contains("b: nope"));
    }

    #[test]
    fn test_resolve_all_preserves_order() {
        let registry = ResolverRegistry::new().with_resolver(fixed("a", ResolutionStatus::Success));
        let results = registry.resolve_all(&["x".to_string(), "y".to_string()]);
        let refs: Vec<_> = results.iter().map(|r| r.reference.as_str()).collect();
        assert_eq!(refs, vec!["x", "y"]);
    }

    #[test]
    fn test_from_config_order() {
        let config = Config::default();
        let registry = ResolverRegistry::from_config(&config).unwrap();
        assert_eq!(registry.names(), vec!["alias", "suite", "exec-test"]);
    }

    #[test]
    fn test_from_config_rejects_unknown() {
        let mut config = Config::default();
        config.resolvers.order = vec!["suite".to_string(), "robot".to_string()];
        let err = ResolverRegistry::from_config(&config).unwrap_err();
        assert!(matches!(err, ResolverError::UnknownResolver(ref n) if n == "robot"));
    }
}
