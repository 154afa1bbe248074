//! Parameter sources in YAML form.
//!
//! Mapping entries whose value is a mapping become child nodes, in document
//! order. Entries with an empty value (`linux:`) become empty child nodes.
//! Everything else is a parameter of the enclosing node. A mapping tagged
//! `!mux` marks its node as a multiplex point:
//!
//! ```yaml
//! timeout: 60
//! os: !mux
//!   linux:
//!     distro: fedora
//!   bsd:
//!     distro: freebsd
//! ```

use std::path::Path;

use serde_yaml::{Mapping, Value};

use super::{TreeError, TreeNode};

const MUX_TAG: &str = "mux";

/// Loads a parameter source from a YAML file.
pub fn load_source(path: &Path) -> Result<TreeNode, TreeError> {
    let content = std::fs::read_to_string(path).map_err(|source| TreeError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_source(&content, &path.display().to_string())
}

/// Parses a parameter source from YAML text.
///
/// `origin` names the source in error messages.
pub fn parse_source(content: &str, origin: &str) -> Result<TreeNode, TreeError> {
    if content.trim().is_empty() {
        return Ok(TreeNode::root());
    }

    let value: Value = serde_yaml::from_str(content).map_err(|e| TreeError::Parse {
        origin: origin.to_string(),
        message: e.to_string(),
    })?;

    let mut root = TreeNode::root();
    match value {
        Value::Null => {}
        Value::Mapping(mapping) => fill_node(&mut root, mapping, origin)?,
        Value::Tagged(tagged) if tagged.tag == MUX_TAG => {
            root.set_multiplex(true);
            match tagged.value {
                Value::Mapping(mapping) => fill_node(&mut root, mapping, origin)?,
                Value::Null => {}
                _ => return Err(invalid(origin, "!mux must tag a mapping")),
            }
        }
        _ => return Err(invalid(origin, "top level must be a mapping")),
    }
    Ok(root)
}

fn fill_node(node: &mut TreeNode, mapping: Mapping, origin: &str) -> Result<(), TreeError> {
    for (key, value) in mapping {
        let key = key_to_string(&key)
            .ok_or_else(|| invalid(origin, &format!("unsupported key {:?} under {}", key, node.path())))?;

        match value {
            Value::Mapping(mapping) => {
                let mut child = TreeNode::new(key, node.path());
                fill_node(&mut child, mapping, origin)?;
                node.add_child(child);
            }
            Value::Null => node.add_child(TreeNode::new(key, node.path())),
            Value::Tagged(tagged) if tagged.tag == MUX_TAG => {
                let mut child = TreeNode::new(key, node.path());
                child.set_multiplex(true);
                match tagged.value {
                    Value::Mapping(mapping) => fill_node(&mut child, mapping, origin)?,
                    Value::Null => {}
                    _ => {
                        return Err(invalid(
                            origin,
                            &format!("!mux must tag a mapping (at {})", child.path()),
                        ));
                    }
                }
                node.add_child(child);
            }
            // Unknown tags are transparent.
            Value::Tagged(tagged) => {
                node.values.insert(key, tagged.value);
            }
            other => {
                node.values.insert(key, other);
            }
        }
    }
    Ok(())
}

fn key_to_string(key: &Value) -> Option<String> {
    match key {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn invalid(origin: &str, message: &str) -> TreeError {
    TreeError::InvalidSource(format!("{}: {}", origin, message))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
timeout: 60
os: !mux
  linux:
    distro: fedora
  bsd:
    distro: freebsd
    versions: [13, 14]
hw:
  cpu: !mux
    x86:
    arm:
"#;

    #[test]
    fn test_parse_values_and_children() {
        let root = parse_source(SAMPLE, "sample").unwrap();

        assert_eq!(root.values.get("timeout").and_then(Value::as_u64), Some(60));
        assert_eq!(root.paths(), vec![
            "/", "/os", "/os/linux", "/os/bsd", "/hw", "/hw/cpu", "/hw/cpu/x86", "/hw/cpu/arm",
        ]);

        let bsd = root.get_node("/os/bsd").unwrap();
        assert_eq!(bsd.values.get("distro"), Some(&Value::from("freebsd")));
        assert!(matches!(bsd.values.get("versions"), Some(Value::Sequence(_))));
    }

    #[test]
    fn test_parse_mux_flags() {
        let root = parse_source(SAMPLE, "sample").unwrap();
        assert!(root.get_node("/os").unwrap().is_multiplex());
        assert!(!root.get_node("/hw").unwrap().is_multiplex());
        assert!(root.get_node("/hw/cpu").unwrap().is_multiplex());
        assert!(root.get_node("/hw/cpu/x86").unwrap().is_leaf());
    }

    #[test]
    fn test_parse_empty_document() {
        let root = parse_source("", "empty").unwrap();
        assert!(root.is_leaf());
        assert!(root.values.is_empty());
    }

    #[test]
    fn test_parse_rejects_non_mapping_root() {
        let err = parse_source("- a\n- b\n", "list").unwrap_err();
        assert!(matches!(err, TreeError::InvalidSource(_)));
    }

    #[test]
    fn test_parse_reports_syntax_errors() {
        let err = parse_source("a: [unclosed", "broken.yaml").unwrap_err();
        assert!(err.to_string().contains("broken.yaml"));
    }

    #[test]
    fn test_load_source_missing_file() {
        let err = load_source(Path::new("/nonexistent/params.yaml")).unwrap_err();
        assert!(matches!(err, TreeError::Read { .. }));
    }
}
