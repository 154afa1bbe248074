//! Executable test resolver.
//!
//! Any executable regular file is a test. Its canonical path is the uri.

use std::path::Path;

use super::{ReferenceResolution, Resolution, Resolver};

pub const KIND: &str = "exec-test";

/// Resolves executable files to single-test resolutions.
#[derive(Debug, Default)]
pub struct ExecTestResolver;

impl ExecTestResolver {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(unix)]
fn is_executable(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &std::fs::Metadata) -> bool {
    true
}

impl Resolver for ExecTestResolver {
    fn name(&self) -> &str {
        KIND
    }

    fn resolve(&self, reference: &str) -> ReferenceResolution {
        let path = Path::new(reference);
        let metadata = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(_) => {
                return ReferenceResolution::not_found(reference, KIND, "file does not exist");
            }
        };
        if !metadata.is_file() {
            return ReferenceResolution::not_found(reference, KIND, "not a regular file");
        }
        if !is_executable(&metadata) {
            return ReferenceResolution::error(reference, KIND, "file is not executable");
        }

        match path.canonicalize() {
            Ok(canonical) => ReferenceResolution::success(
                reference,
                KIND,
                vec![Resolution::new(KIND, canonical.display().to_string())],
            ),
            Err(e) => ReferenceResolution::error(reference, KIND, e.to_string()),
        }
    }
}
