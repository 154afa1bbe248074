//! The parameter tree.
//!
//! A [`ParamTree`] is the merged, filtered and injected hierarchy of test
//! parameters from which variants are generated. Trees are put together
//! with a [`ParamTreeBuilder`] and are immutable once built.
//!
//! # Build Order
//!
//! ```text
//!  sources (in order)  ──merge──►  root
//!                                   │
//!  --mux-inject        ──inject──►  │  (overrides merged values)
//!                                   │
//!  --filter-only       ──prune───►  │  (keeps matching nodes and their ancestors)
//!  --filter-out        ──prune───►  │  (drops matching subtrees)
//!                                   ▼
//!                               ParamTree
//! ```
//!
//! # Example
//!
//! ```
//! use plexrun::tree::{ParamTreeBuilder, parse_source};
//!
//! let source = parse_source("os: !mux\n  linux:\n  bsd:\n", "inline")?;
//! let tree = ParamTreeBuilder::new()
//!     .source(source)
//!     .inject("arch:x86_64")?
//!     .build()?;
//!
//! assert_eq!(tree.variant_count(), 2);
//! # Ok::<(), plexrun::tree::TreeError>(())
//! ```

pub mod loader;
pub mod node;

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_yaml::Value;
use tracing::debug;

pub use loader::{load_source, parse_source};
pub use node::{TreeNode, normalize_path, path_has_prefix, split_path};

/// Errors raised while building a parameter tree.
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    /// An injection spec did not contain at least `key:value`.
    #[error("Invalid injection '{0}': key:value pairs required")]
    InvalidInjection(String),

    /// A parameter file could not be read.
    #[error("Failed to read parameter file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A parameter source is not valid YAML.
    #[error("Failed to parse parameter source {origin}: {message}")]
    Parse { origin: String, message: String },

    /// A parameter source is valid YAML but not a valid tree.
    #[error("Invalid parameter source {0}")]
    InvalidSource(String),

    /// The number of variants does not fit in 64 bits.
    #[error("Parameter tree expands to too many variants")]
    TooManyVariants,
}

/// A `[path:]key:value` override applied to the merged tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Injection {
    /// Node path, `None` for the root.
    pub path: Option<String>,
    pub key: String,
    pub value: String,
}

impl FromStr for Injection {
    type Err = TreeError;

    /// Splits on `:` into at most three parts: `key:value` targets the
    /// root, `path:key:value` targets (and creates) the node at `path`.
    /// Any further colons belong to the value.
    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = spec.splitn(3, ':').collect();
        let injection = match parts.as_slice() {
            [key, value] => Injection {
                path: None,
                key: key.to_string(),
                value: value.to_string(),
            },
            [path, key, value] => Injection {
                path: Some(path.to_string()),
                key: key.to_string(),
                value: value.to_string(),
            },
            _ => return Err(TreeError::InvalidInjection(spec.to_string())),
        };
        if injection.key.is_empty() {
            return Err(TreeError::InvalidInjection(spec.to_string()));
        }
        Ok(injection)
    }
}

impl Injection {
    /// Applies this injection to `root`, creating the target node if needed.
    pub fn apply(&self, root: &mut TreeNode) {
        let node = match &self.path {
            Some(path) => root.get_node_mut(path, true),
            None => Some(root),
        };
        if let Some(node) = node {
            node.values
                .insert(self.key.clone(), Value::String(self.value.clone()));
        }
    }
}

/// Where a builder gets one of its sources from.
#[derive(Debug, Clone)]
enum Source {
    Tree(TreeNode),
    File(PathBuf),
}

/// Collects sources, filters and injections, then builds a [`ParamTree`].
///
/// Injection specs are validated as soon as they are added, while files
/// are only read by [`build`](Self::build). This lets a caller reject a
/// malformed `--mux-inject` up front and load the files later, possibly
/// on another thread.
#[derive(Debug, Clone, Default)]
pub struct ParamTreeBuilder {
    sources: Vec<Source>,
    filter_only: Vec<String>,
    filter_out: Vec<String>,
    priority: Vec<String>,
    injections: Vec<Injection>,
}

impl ParamTreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an in-memory source. Later sources override earlier ones.
    pub fn source(mut self, root: TreeNode) -> Self {
        self.sources.push(Source::Tree(root));
        self
    }

    /// Adds a YAML file source, read at build time.
    pub fn source_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.sources.push(Source::File(path.into()));
        self
    }

    /// Restricts the tree to the given path prefixes.
    pub fn filter_only<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.filter_only
            .extend(paths.into_iter().map(|p| normalize_path(p.as_ref())));
        self
    }

    /// Removes subtrees under the given path prefixes.
    pub fn filter_out<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.filter_out
            .extend(paths.into_iter().map(|p| normalize_path(p.as_ref())));
        self
    }

    /// Sets the path priority used when unrelated nodes define the same key.
    pub fn priority<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.priority
            .extend(paths.into_iter().map(|p| normalize_path(p.as_ref())));
        self
    }

    /// Parses and queues a `[path:]key:value` injection.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::InvalidInjection`] if `spec` has no colon.
    pub fn inject(mut self, spec: &str) -> Result<Self, TreeError> {
        self.injections.push(spec.parse()?);
        Ok(self)
    }

    /// Reads the file sources, merges everything and applies injections
    /// and filters.
    pub fn build(self) -> Result<ParamTree, TreeError> {
        let mut root = TreeNode::root();
        for source in self.sources {
            let tree = match source {
                Source::Tree(tree) => tree,
                Source::File(path) => load_from(&path)?,
            };
            root.merge(tree);
        }

        for injection in &self.injections {
            injection.apply(&mut root);
        }

        if !self.filter_only.is_empty() {
            apply_filter_only(&mut root, &self.filter_only);
        }
        if !self.filter_out.is_empty() {
            apply_filter_out(&mut root, &self.filter_out);
        }

        let count = root.compute_counts().ok_or(TreeError::TooManyVariants)?;
        debug!("Parameter tree built with {} variant(s)", count);

        Ok(ParamTree {
            root,
            priority: self.priority,
        })
    }
}

fn load_from(path: &Path) -> Result<TreeNode, TreeError> {
    debug!("Loading parameter file {}", path.display());
    load_source(path)
}

/// Keeps nodes under one of `prefixes`, plus the ancestors leading to them.
fn apply_filter_only(node: &mut TreeNode, prefixes: &[String]) {
    node.retain_children(|child| {
        prefixes.iter().any(|p| {
            path_has_prefix(child.path(), p) || path_has_prefix(p, child.path())
        })
    });
    for child in node.children_mut() {
        let fully_kept = prefixes.iter().any(|p| path_has_prefix(child.path(), p));
        if !fully_kept {
            apply_filter_only(child, prefixes);
        }
    }
}

fn apply_filter_out(node: &mut TreeNode, prefixes: &[String]) {
    node.retain_children(|child| !prefixes.iter().any(|p| path_has_prefix(child.path(), p)));
    for child in node.children_mut() {
        apply_filter_out(child, prefixes);
    }
}

/// An immutable parameter tree, ready for variant generation.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamTree {
    root: TreeNode,
    priority: Vec<String>,
}

impl ParamTree {
    /// Builds a tree from in-memory sources.
    ///
    /// Shorthand for a [`ParamTreeBuilder`] without injections.
    pub fn build(
        sources: Vec<TreeNode>,
        filter_only: &[String],
        filter_out: &[String],
        priority: &[String],
    ) -> Result<Self, TreeError> {
        sources
            .into_iter()
            .fold(ParamTreeBuilder::new(), ParamTreeBuilder::source)
            .filter_only(filter_only)
            .filter_out(filter_out)
            .priority(priority)
            .build()
    }

    pub fn root(&self) -> &TreeNode {
        &self.root
    }

    /// Looks up a node by path.
    pub fn get_node(&self, path: &str) -> Option<&TreeNode> {
        self.root.get_node(path)
    }

    /// Rank of `path` in the priority list; lower is stronger.
    pub(crate) fn priority_rank(&self, path: &str) -> usize {
        self.priority
            .iter()
            .position(|p| path_has_prefix(path, p))
            .unwrap_or(usize::MAX)
    }

    /// Total number of variants, computed without enumerating them.
    pub fn variant_count(&self) -> u64 {
        self.root.variant_count()
    }
}

impl Default for ParamTree {
    fn default() -> Self {
        let mut root = TreeNode::root();
        root.compute_counts();
        Self {
            root,
            priority: Vec::new(),
        }
    }
}
