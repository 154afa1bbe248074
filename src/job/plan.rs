//! Execution plan: resolutions crossed with variants.

use std::sync::LazyLock;

use regex::Regex;

use crate::resolver::Resolution;
use crate::tree::ParamTree;
use crate::variant::Variant;

static UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9._;:+=-]+").expect("literal regex"));

/// Longest directory name component written for an entry.
const MAX_DIR_NAME: usize = 200;

/// The ordered product of resolutions and variants.
///
/// Resolutions vary slowest: every variant of the first resolution runs
/// before the second resolution starts.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    resolutions: Vec<Resolution>,
    variant_count: u64,
}

/// One `(resolution, variant)` pair of the plan.
#[derive(Debug, Clone)]
pub struct PlanEntry<'a> {
    /// Zero-based position in the plan.
    pub index: usize,
    pub resolution: &'a Resolution,
    pub variant: Variant,
}

impl PlanEntry<'_> {
    /// `<uri>;<variant id>`
    pub fn test_id(&self) -> String {
        format!("{};{}", self.resolution.uri, self.variant.id())
    }

    /// Name of this entry's result subdirectory, `<NNN>-<uri>;<variant>`.
    pub fn dir_name(&self) -> String {
        let name = format!("{:03}-{}", self.index + 1, self.test_id());
        let name = UNSAFE_CHARS.replace_all(&name, "_");
        name.chars().take(MAX_DIR_NAME).collect()
    }
}

impl ExecutionPlan {
    pub fn new(resolutions: Vec<Resolution>, tree: &ParamTree) -> Self {
        Self {
            resolutions,
            variant_count: tree.variant_count(),
        }
    }

    /// Number of entries, `|resolutions| x |variants|`.
    pub fn len(&self) -> usize {
        let total = (self.resolutions.len() as u64).saturating_mul(self.variant_count);
        usize::try_from(total).unwrap_or(usize::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn resolutions(&self) -> &[Resolution] {
        &self.resolutions
    }

    pub fn variant_count(&self) -> u64 {
        self.variant_count
    }

    /// Lazily yields the plan entries in order.
    ///
    /// `tree` must be the tree the plan was built from.
    pub fn entries<'a>(&'a self, tree: &'a ParamTree) -> impl Iterator<Item = PlanEntry<'a>> + 'a {
        self.resolutions
            .iter()
            .flat_map(move |resolution| tree.variants().map(move |variant| (resolution, variant)))
            .enumerate()
            .map(|(index, (resolution, variant))| PlanEntry {
                index,
                resolution,
                variant,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::TreeNode;

    fn mux_tree() -> ParamTree {
        let os = TreeNode::new("os", "/")
            .multiplexed()
            .with_child(TreeNode::new("linux", "/os").with_value("os", "linux"))
            .with_child(TreeNode::new("bsd", "/os").with_value("os", "bsd"))
            .with_child(TreeNode::new("mac", "/os").with_value("os", "mac"));
        ParamTree::build(vec![TreeNode::root().with_child(os)], &[], &[], &[]).unwrap()
    }

    #[test]
    fn test_resolution_outer_variant_inner() {
        let tree = mux_tree();
        let plan = ExecutionPlan::new(
            vec![Resolution::new("alias", "alias:a"), Resolution::new("alias", "alias:b")],
            &tree,
        );
        assert_eq!(plan.len(), 6);

        let order: Vec<_> = plan
            .entries(&tree)
            .map(|e| {
                (
                    e.index,
                    e.resolution.uri.clone(),
                    e.variant.get("os").and_then(|v| v.as_str()).unwrap().to_string(),
                )
            })
            .collect();
        assert_eq!(order[0], (0, "alias:a".to_string(), "linux".to_string()));
        assert_eq!(order[2], (2, "alias:a".to_string(), "mac".to_string()));
        assert_eq!(order[3], (3, "alias:b".to_string(), "linux".to_string()));
        assert_eq!(order.len(), 6);
    }

    #[test]
    fn test_dir_name_is_sanitized() {
        let tree = ParamTree::default();
        let resolutions = vec![Resolution::new("exec-test", "/tmp/my tests/a b.sh")];
        let plan = ExecutionPlan::new(resolutions, &tree);
        let entry = plan.entries(&tree).next().unwrap();

        let name = entry.dir_name();
        assert!(name.starts_with("001-_tmp_my_tests_a_b.sh;1-"));
        assert!(!name.contains('/'));
        assert!(!name.contains(' '));
    }

    #[test]
    fn test_empty_plan() {
        let tree = mux_tree();
        let plan = ExecutionPlan::new(Vec::new(), &tree);
        assert!(plan.is_empty());
        assert_eq!(plan.entries(&tree).count(), 0);
    }
}
