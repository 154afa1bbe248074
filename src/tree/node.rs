//! Tree nodes of the parameter tree.

use std::collections::BTreeMap;

use serde_yaml::Value;

/// A single node of the parameter tree.
///
/// Each node is addressed by a slash-delimited path (`/`, `/os`,
/// `/os/linux`, ...), owns its key/value parameters and an ordered list of
/// children. A node flagged as a *multiplex point* treats its children as
/// mutually exclusive alternatives; otherwise the children are combined.
///
/// Children are owned exclusively by their parent, and sibling names are
/// unique: adding a child whose name already exists merges into it.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    name: String,
    path: String,
    /// Parameters defined directly on this node.
    pub values: BTreeMap<String, Value>,
    children: Vec<TreeNode>,
    multiplex: bool,
    /// Number of variants this subtree expands to, filled in by
    /// [`TreeNode::compute_counts`].
    count: u64,
}

impl TreeNode {
    /// Creates an empty root node (path `/`).
    pub fn root() -> Self {
        Self {
            name: String::new(),
            path: "/".to_string(),
            values: BTreeMap::new(),
            children: Vec::new(),
            multiplex: false,
            count: 1,
        }
    }

    /// Creates an empty node named `name` below `parent_path`.
    pub fn new(name: impl Into<String>, parent_path: &str) -> Self {
        let name = name.into();
        let path = join_path(parent_path, &name);
        Self {
            name,
            path,
            values: BTreeMap::new(),
            children: Vec::new(),
            multiplex: false,
            count: 1,
        }
    }

    /// Sets a parameter on this node.
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Adds a child node, consuming and returning self.
    pub fn with_child(mut self, child: TreeNode) -> Self {
        self.add_child(child);
        self
    }

    /// Flags this node as a multiplex point.
    pub fn multiplexed(mut self) -> Self {
        self.multiplex = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn children(&self) -> &[TreeNode] {
        &self.children
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn is_multiplex(&self) -> bool {
        self.multiplex
    }

    pub fn set_multiplex(&mut self, multiplex: bool) {
        self.multiplex = multiplex;
    }

    /// Returns the direct child called `name`.
    pub fn child(&self, name: &str) -> Option<&TreeNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Adds a child node.
    ///
    /// The child (and its whole subtree) is re-rooted below this node's
    /// path. If a child with the same name already exists, the new one is
    /// merged into it instead, so paths stay unique.
    pub fn add_child(&mut self, mut child: TreeNode) {
        child.reparent(&self.path);
        match self.children.iter_mut().find(|c| c.name == child.name) {
            Some(existing) => existing.merge(child),
            None => self.children.push(child),
        }
    }

    /// Merges `other` into this node.
    ///
    /// Values from `other` override values with the same key, the
    /// multiplex flag is sticky, and children are merged by name with new
    /// children appended in `other`'s order.
    pub fn merge(&mut self, other: TreeNode) {
        self.values.extend(other.values);
        self.multiplex |= other.multiplex;
        for child in other.children {
            self.add_child(child);
        }
    }

    /// Looks up a descendant by path. `/` and the empty path name this node.
    pub fn get_node(&self, path: &str) -> Option<&TreeNode> {
        let mut node = self;
        for name in split_path(path) {
            node = node.child(name)?;
        }
        Some(node)
    }

    /// Looks up a descendant by path for modification.
    ///
    /// With `create` set, missing nodes along the way are created.
    pub fn get_node_mut(&mut self, path: &str, create: bool) -> Option<&mut TreeNode> {
        let mut node = self;
        for name in split_path(path) {
            let idx = match node.children.iter().position(|c| c.name == name) {
                Some(idx) => idx,
                None if create => {
                    let child = TreeNode::new(name, &node.path);
                    node.children.push(child);
                    node.children.len() - 1
                }
                None => return None,
            };
            node = &mut node.children[idx];
        }
        Some(node)
    }

    /// Keeps only the children for which `keep` returns true.
    pub(crate) fn retain_children(&mut self, keep: impl FnMut(&TreeNode) -> bool) {
        self.children.retain(keep);
    }

    pub(crate) fn children_mut(&mut self) -> &mut [TreeNode] {
        &mut self.children
    }

    /// Returns all node paths in pre-order.
    pub fn paths(&self) -> Vec<&str> {
        let mut out = vec![self.path.as_str()];
        for child in &self.children {
            out.extend(child.paths());
        }
        out
    }

    /// Number of variants this subtree expands to.
    pub(crate) fn variant_count(&self) -> u64 {
        self.count
    }

    /// Recomputes the cached variant counts for the whole subtree.
    ///
    /// A leaf counts once. A multiplex node counts the sum of its
    /// alternatives, any other node the product of its children. Returns
    /// `None` if the count does not fit in a `u64`.
    pub(crate) fn compute_counts(&mut self) -> Option<u64> {
        let mut total: Option<u64> = None;
        for child in &mut self.children {
            let c = child.compute_counts()?;
            total = Some(match total {
                None => c,
                Some(t) if self.multiplex => t.checked_add(c)?,
                Some(t) => t.checked_mul(c)?,
            });
        }
        self.count = total.unwrap_or(1);
        Some(self.count)
    }

    fn reparent(&mut self, parent_path: &str) {
        self.path = join_path(parent_path, &self.name);
        let path = self.path.clone();
        for child in &mut self.children {
            child.reparent(&path);
        }
    }
}

impl Default for TreeNode {
    fn default() -> Self {
        Self::root()
    }
}

/// Splits a slash-delimited path into its non-empty components.
pub fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Normalizes a path to the `/a/b` form.
pub fn normalize_path(path: &str) -> String {
    let parts: Vec<&str> = split_path(path).collect();
    format!("/{}", parts.join("/"))
}

/// Returns true if `path` equals `prefix` or lies below it.
///
/// Matching is done per component: `/os` is a prefix of `/os/linux` but
/// not of `/osx`.
pub fn path_has_prefix(path: &str, prefix: &str) -> bool {
    let mut path = split_path(path);
    split_path(prefix).all(|p| path.next() == Some(p))
}

fn join_path(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{}{}", parent, name)
    } else {
        format!("{}/{}", parent, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_paths() {
        let root = TreeNode::root().with_child(
            TreeNode::new("os", "/").with_child(TreeNode::new("linux", "/os")),
        );
        assert_eq!(root.paths(), vec!["/", "/os", "/os/linux"]);
    }

    #[test]
    fn test_add_child_reroots_subtree() {
        let sub = TreeNode::new("hw", "/elsewhere").with_child(TreeNode::new("cpu", "/x"));
        let root = TreeNode::root().with_child(sub);
        assert_eq!(root.get_node("/hw/cpu").unwrap().path(), "/hw/cpu");
    }

    #[test]
    fn test_duplicate_child_is_merged() {
        let mut root = TreeNode::root();
        root.add_child(TreeNode::new("os", "/").with_value("a", "1"));
        root.add_child(TreeNode::new("os", "/").with_value("a", "2").with_value("b", "3"));

        assert_eq!(root.children().len(), 1);
        let os = root.child("os").unwrap();
        assert_eq!(os.values.get("a"), Some(&Value::from("2")));
        assert_eq!(os.values.get("b"), Some(&Value::from("3")));
    }

    #[test]
    fn test_get_node_mut_creates_intermediate_nodes() {
        let mut root = TreeNode::root();
        assert!(root.get_node_mut("/a/b", false).is_none());

        let node = root.get_node_mut("/a/b", true).unwrap();
        assert_eq!(node.path(), "/a/b");
        assert!(root.get_node("/a").is_some());
        assert!(root.get_node("a/b/").is_some());
    }

    #[test]
    fn test_path_has_prefix_is_component_wise() {
        assert!(path_has_prefix("/os", "/os"));
        assert!(path_has_prefix("/os/linux", "/os"));
        assert!(path_has_prefix("/os/linux", "/"));
        assert!(!path_has_prefix("/osx", "/os"));
        assert!(!path_has_prefix("/os", "/os/linux"));
    }

    #[test]
    fn test_compute_counts() {
        let mut root = TreeNode::root()
            .with_child(
                TreeNode::new("os", "/")
                    .multiplexed()
                    .with_child(TreeNode::new("linux", "/os"))
                    .with_child(TreeNode::new("bsd", "/os")),
            )
            .with_child(
                TreeNode::new("hw", "/")
                    .multiplexed()
                    .with_child(TreeNode::new("x86", "/hw"))
                    .with_child(TreeNode::new("arm", "/hw"))
                    .with_child(TreeNode::new("riscv", "/hw")),
            );
        assert_eq!(root.compute_counts(), Some(6));
    }
}
