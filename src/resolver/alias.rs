//! Alias resolver.
//!
//! Resolves names declared in the `[aliases]` table of the settings file:
//!
//! ```toml
//! [aliases]
//! smoke = "./scripts/smoke.sh --quick"
//! ```

use std::collections::BTreeMap;

use super::{ReferenceResolution, Resolution, Resolver};

pub const KIND: &str = "alias";

/// Resolves configured aliases to shell command lines.
pub struct AliasResolver {
    aliases: BTreeMap<String, String>,
}

impl AliasResolver {
    pub fn new(aliases: BTreeMap<String, String>) -> Self {
        Self { aliases }
    }
}

impl Resolver for AliasResolver {
    fn name(&self) -> &str {
        KIND
    }

    fn resolve(&self, reference: &str) -> ReferenceResolution {
        let Some(command) = self.aliases.get(reference) else {
            return ReferenceResolution::not_found(reference, KIND, "no such alias");
        };

        if command.trim().is_empty() {
            return ReferenceResolution::error(reference, KIND, "alias has an empty command");
        }
        if let Err(e) = shell_words::split(command) {
            return ReferenceResolution::error(
                reference,
                KIND,
                format!("alias command cannot be parsed: {}", e),
            );
        }

        let resolution = Resolution::new(KIND, format!("alias:{}", reference))
            .with_parameter("command", command.clone());
        ReferenceResolution::success(reference, KIND, vec![resolution])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ResolutionStatus;

    fn resolver() -> AliasResolver {
        let mut aliases = BTreeMap::new();
        aliases.insert("smoke".to_string(), "true".to_string());
        aliases.insert("broken".to_string(), "echo 'unterminated".to_string());
        aliases.insert("empty".to_string(), "  ".to_string());
        AliasResolver::new(aliases)
    }

    #[test]
    fn test_known_alias() {
        let result = resolver().resolve("smoke");
        assert_eq!(result.status, ResolutionStatus::Success);
        assert_eq!(result.resolutions.len(), 1);
        assert_eq!(result.resolutions[0].kind, "alias");
        assert_eq!(result.resolutions[0].uri, "alias:smoke");
        assert_eq!(result.resolutions[0].parameter("command"), Some("true"));
    }

    #[test]
    fn test_unknown_alias() {
        assert_eq!(resolver().resolve("other").status, ResolutionStatus::NotFound);
    }

    #[test]
    fn test_invalid_alias_commands() {
        assert_eq!(resolver().resolve("broken").status, ResolutionStatus::Error);
        assert_eq!(resolver().resolve("empty").status, ResolutionStatus::Error);
    }
}
