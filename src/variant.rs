//! Variant generation.
//!
//! A variant is one fully resolved assignment of parameters, obtained by
//! picking one alternative at every multiplex point of a [`ParamTree`] and
//! merging the values of every node along the way.
//!
//! # Expansion
//!
//! ```text
//!  /                      count = 2 x 2 = 4
//!  ├── os   (mux)         count = 1 + 1
//!  │   ├── linux
//!  │   └── bsd
//!  └── hw   (mux)         count = 1 + 1
//!      ├── x86
//!      └── arm
//!
//!  variant 0: linux x86    variant 1: linux arm
//!  variant 2: bsd   x86    variant 3: bsd   arm
//! ```
//!
//! Variants are never stored up front. [`Variants`] decodes each index on
//! demand: a non-multiplex node splits the index as a mixed-radix number
//! over its children (last child varies fastest), a multiplex node picks
//! the child whose cumulative range contains the index. Iteration is
//! restartable and memory is bounded by the depth of the tree.

use serde::Serialize;
use serde_yaml::Value;
use sha2::{Digest, Sha256};

use crate::tree::{ParamTree, TreeNode, path_has_prefix};

/// One `(path, key, value)` entry of a variant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariantParam {
    /// Path of the node the value was taken from.
    pub path: String,
    pub key: String,
    pub value: Value,
}

/// A fully resolved parameter assignment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Variant {
    index: u64,
    id: String,
    leaves: Vec<String>,
    params: Vec<VariantParam>,
}

impl Variant {
    /// Zero-based position in the variant sequence.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Stable identifier: one-based index plus a short content digest,
    /// e.g. `2-9f86d081`.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Paths of the leaf nodes this variant was built from.
    pub fn leaves(&self) -> &[String] {
        &self.leaves
    }

    pub fn params(&self) -> &[VariantParam] {
        &self.params
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Returns the resolved value of `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.params.iter().find(|p| p.key == key).map(|p| &p.value)
    }
}

/// Lazy, restartable sequence of variants of a tree.
///
/// Created by [`generate`] or [`ParamTree::variants`].
#[derive(Debug, Clone)]
pub struct Variants<'a> {
    tree: &'a ParamTree,
    next: u64,
    end: u64,
}

/// Returns the variants of `tree`.
///
/// A tree without multiplex points yields exactly one variant holding the
/// merged defaults.
pub fn generate(tree: &ParamTree) -> Variants<'_> {
    Variants {
        tree,
        next: 0,
        end: tree.variant_count(),
    }
}

impl ParamTree {
    /// Returns a fresh iterator over all variants.
    pub fn variants(&self) -> Variants<'_> {
        generate(self)
    }

    /// Decodes the variant at `index` without walking the ones before it.
    pub fn variant(&self, index: u64) -> Option<Variant> {
        if index >= self.variant_count() {
            return None;
        }

        let mut visited = Vec::new();
        select(self.root(), index, &mut visited);

        let mut params: Vec<VariantParam> = Vec::new();
        let mut leaves = Vec::new();
        for node in &visited {
            if node.is_leaf() {
                leaves.push(node.path().to_string());
            }
            for (key, value) in &node.values {
                let candidate = VariantParam {
                    path: node.path().to_string(),
                    key: key.clone(),
                    value: value.clone(),
                };
                match params.iter_mut().find(|p| &p.key == key) {
                    Some(existing) => {
                        if self.overrides(node.path(), &existing.path) {
                            *existing = candidate;
                        }
                    }
                    None => params.push(candidate),
                }
            }
        }

        let id = format!("{}-{}", index + 1, digest(&params));
        Some(Variant {
            index,
            id,
            leaves,
            params,
        })
    }

    /// Whether a value set at `new` replaces one already set at `old`.
    ///
    /// Nodes are visited in pre-order, so `old` is never below `new`.
    fn overrides(&self, new: &str, old: &str) -> bool {
        if path_has_prefix(new, old) {
            return true;
        }
        self.priority_rank(new) <= self.priority_rank(old)
    }
}

/// Collects, in pre-order, the nodes taking part in variant `index` of
/// the subtree rooted at `node`.
fn select<'a>(node: &'a TreeNode, index: u64, out: &mut Vec<&'a TreeNode>) {
    out.push(node);
    let children = node.children();
    if children.is_empty() {
        return;
    }

    if node.is_multiplex() {
        let mut index = index;
        for child in children {
            let count = child.variant_count();
            if index < count {
                select(child, index, out);
                return;
            }
            index -= count;
        }
    } else {
        let mut digits = vec![0; children.len()];
        let mut rest = index;
        for (i, child) in children.iter().enumerate().rev() {
            let count = child.variant_count();
            digits[i] = rest % count;
            rest /= count;
        }
        for (child, digit) in children.iter().zip(digits) {
            select(child, digit, out);
        }
    }
}

fn digest(params: &[VariantParam]) -> String {
    let mut hasher = Sha256::new();
    for param in params {
        hasher.update(param.path.as_bytes());
        hasher.update([0u8]);
        hasher.update(param.key.as_bytes());
        hasher.update([0u8]);
        hasher.update(serde_yaml::to_string(&param.value).unwrap_or_default().as_bytes());
        hasher.update([b'\n']);
    }
    let hex = format!("{:x}", hasher.finalize());
    hex[..8].to_string()
}

impl Iterator for Variants<'_> {
    type Item = Variant;

    fn next(&mut self) -> Option<Variant> {
        if self.next >= self.end {
            return None;
        }
        let variant = self.tree.variant(self.next);
        self.next += 1;
        variant
    }

    fn nth(&mut self, n: usize) -> Option<Variant> {
        self.next = self.next.saturating_add(n as u64).min(self.end);
        self.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end - self.next;
        match usize::try_from(remaining) {
            Ok(n) => (n, Some(n)),
            Err(_) => (usize::MAX, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn mux(name: &str, parent: &str, alternatives: &[&str]) -> TreeNode {
        let path = if parent == "/" {
            format!("/{}", name)
        } else {
            format!("{}/{}", parent, name)
        };
        alternatives.iter().fold(
            TreeNode::new(name, parent).multiplexed(),
            |node, alt| node.with_child(TreeNode::new(*alt, &path).with_value(name, *alt)),
        )
    }

    fn build(root: TreeNode) -> ParamTree {
        ParamTree::build(vec![root], &[], &[], &[]).unwrap()
    }

    #[test]
    fn test_no_multiplex_yields_merged_defaults() {
        let tree = build(
            TreeNode::root()
                .with_value("timeout", 60)
                .with_child(TreeNode::new("hw", "/").with_value("cpus", 4))
                .with_child(TreeNode::new("os", "/").with_value("name", "linux")),
        );

        let variants: Vec<_> = tree.variants().collect();
        assert_eq!(variants.len(), 1);

        let variant = &variants[0];
        assert_eq!(variant.params().len(), 3);
        assert_eq!(variant.get("timeout").and_then(Value::as_u64), Some(60));
        assert_eq!(variant.get("cpus").and_then(Value::as_u64), Some(4));
        assert_eq!(variant.get("name"), Some(&Value::from("linux")));
    }

    #[test]
    fn test_two_independent_mux_nodes_yield_four_variants() {
        let tree = build(
            TreeNode::root()
                .with_child(mux("os", "/", &["linux", "bsd"]))
                .with_child(mux("hw", "/", &["x86", "arm"])),
        );

        let combos: Vec<(String, String)> = tree
            .variants()
            .map(|v| {
                (
                    v.get("os").and_then(Value::as_str).unwrap().to_string(),
                    v.get("hw").and_then(Value::as_str).unwrap().to_string(),
                )
            })
            .collect();

        assert_eq!(combos.len(), 4);
        let unique: HashSet<_> = combos.iter().cloned().collect();
        assert_eq!(unique.len(), 4);
        assert_eq!(combos[0], ("linux".to_string(), "x86".to_string()));
        assert_eq!(combos[1], ("linux".to_string(), "arm".to_string()));
        assert_eq!(combos[3], ("bsd".to_string(), "arm".to_string()));
    }

    #[test]
    fn test_nested_mux_counts_alternatives() {
        // linux has two flavours, bsd has none: 2 + 1 alternatives.
        let linux = TreeNode::new("linux", "/os")
            .with_child(mux("flavour", "/os/linux", &["fedora", "debian"]));
        let os = TreeNode::new("os", "/")
            .multiplexed()
            .with_child(linux)
            .with_child(TreeNode::new("bsd", "/os"));
        let tree = build(TreeNode::root().with_child(os));

        let leaves: Vec<Vec<String>> = tree.variants().map(|v| v.leaves().to_vec()).collect();
        assert_eq!(leaves, vec![
            vec!["/os/linux/flavour/fedora".to_string()],
            vec!["/os/linux/flavour/debian".to_string()],
            vec!["/os/bsd".to_string()],
        ]);
    }

    #[test]
    fn test_descendant_overrides_ancestor() {
        let tree = build(
            TreeNode::root().with_value("mode", "default").with_child(
                TreeNode::new("run", "/")
                    .multiplexed()
                    .with_child(TreeNode::new("fast", "/run").with_value("mode", "fast"))
                    .with_child(TreeNode::new("plain", "/run")),
            ),
        );

        let modes: Vec<_> = tree
            .variants()
            .map(|v| v.get("mode").and_then(Value::as_str).unwrap().to_string())
            .collect();
        assert_eq!(modes, vec!["fast", "default"]);

        let fast = tree.variant(0).unwrap();
        let param = fast.params().iter().find(|p| p.key == "mode").unwrap();
        assert_eq!(param.path, "/run/fast");
    }

    #[test]
    fn test_filter_only_limits_variant_keys() {
        let root = TreeNode::root()
            .with_child(mux("os", "/", &["linux", "bsd"]))
            .with_child(mux("hw", "/", &["x86", "arm"]));
        let tree = ParamTree::build(vec![root], &["/os".to_string()], &[], &[]).unwrap();

        let variants: Vec<_> = tree.variants().collect();
        assert_eq!(variants.len(), 2);
        for variant in &variants {
            assert!(!variant.is_empty());
            assert!(variant.params().iter().all(|p| path_has_prefix(&p.path, "/os")));
        }
    }

    #[test]
    fn test_priority_breaks_ties_between_unrelated_nodes() {
        let root = TreeNode::root()
            .with_child(TreeNode::new("a", "/").with_value("name", "from-a"))
            .with_child(TreeNode::new("b", "/").with_value("name", "from-b"));

        let plain = build(root.clone());
        let variant = plain.variant(0).unwrap();
        assert_eq!(variant.get("name"), Some(&Value::from("from-b")));

        let prioritized = ParamTree::build(vec![root], &[], &[], &["/a".to_string()]).unwrap();
        let variant = prioritized.variant(0).unwrap();
        assert_eq!(variant.get("name"), Some(&Value::from("from-a")));
        let param = variant.params().iter().find(|p| p.key == "name").unwrap();
        assert_eq!(param.path, "/a");
    }

    #[test]
    fn test_generation_is_restartable_and_stable() {
        let tree = build(
            TreeNode::root()
                .with_child(mux("os", "/", &["linux", "bsd"]))
                .with_child(mux("hw", "/", &["x86", "arm", "riscv"])),
        );

        let first: Vec<_> = generate(&tree).collect();
        let second: Vec<_> = generate(&tree).collect();
        assert_eq!(first, second);

        let ids: HashSet<_> = first.iter().map(|v| v.id().to_string()).collect();
        assert_eq!(ids.len(), 6);
        assert!(first[0].id().starts_with("1-"));
    }

    #[test]
    fn test_nth_matches_sequential_iteration() {
        let tree = build(
            TreeNode::root()
                .with_child(mux("os", "/", &["linux", "bsd"]))
                .with_child(mux("hw", "/", &["x86", "arm", "riscv"])),
        );

        let all: Vec<_> = tree.variants().collect();
        let mut iter = tree.variants();
        assert_eq!(iter.nth(4).as_ref(), Some(&all[4]));
        assert_eq!(iter.next().as_ref(), Some(&all[5]));
        assert!(iter.next().is_none());
        assert_eq!(tree.variant(6), None);
        assert_eq!(tree.variants().size_hint(), (6, Some(6)));
    }
}
