//! Configuration loading.
//!
//! Settings are read from a TOML file, `plexrun.toml` by default. Every
//! value has a default, and command line flags override the file.

pub mod schema;

pub use schema::*;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

/// Loads configuration from a TOML file.
///
/// # Example
///
/// ```no_run
/// use plexrun::config::load_config;
/// use std::path::Path;
///
/// let config = load_config(Path::new("plexrun.toml"))?;
/// println!("Max parallel: {}", config.job.max_parallel);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Loads configuration from a TOML string.
///
/// ```
/// use plexrun::config::load_config_str;
///
/// let config = load_config_str(r#"
///     [job]
///     max_parallel = 4
///
///     [aliases]
///     smoke = "true"
/// "#)?;
///
/// assert_eq!(config.job.max_parallel, 4);
/// assert_eq!(config.aliases["smoke"], "true");
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config_str(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;

    Ok(config)
}

/// Loads `path` if it exists, otherwise returns the defaults.
///
/// A path given explicitly by the user must exist; pass `required = true`
/// for it.
pub fn load_config_or_default(path: &Path, required: bool) -> Result<Config> {
    if !required && !path.exists() {
        debug!("No config file at {}, using defaults", path.display());
        return Ok(Config::default());
    }
    load_config(path)
}

impl JobSettings {
    /// Result directory with `~` and environment variables expanded.
    pub fn results_dir(&self) -> Result<PathBuf> {
        let raw = self.results_dir.to_string_lossy();
        let expanded = shellexpand::full(&raw)
            .with_context(|| format!("Failed to expand results_dir: {}", raw))?;
        Ok(PathBuf::from(expanded.into_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::RecordMode;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = load_config_str("").unwrap();
        assert_eq!(config.job.max_parallel, 1);
        assert_eq!(config.job.test_timeout_secs, 0);
        assert_eq!(config.job.stop_grace_secs, 5);
        assert_eq!(config.resolvers.order, vec!["alias", "suite", "exec-test"]);
        assert!(config.aliases.is_empty());
        assert!(config.output_check.enabled);
        assert_eq!(config.output_check.record, RecordMode::None);
    }

    #[test]
    fn test_full_config() {
        let config = load_config_str(
            r#"
            [job]
            results_dir = "/var/results"
            max_parallel = 8
            test_timeout_secs = 60

            [resolvers]
            order = ["exec-test"]

            [aliases]
            smoke = "./smoke.sh --fast"

            [output_check]
            enabled = false
            record = "stdout"
            "#,
        )
        .unwrap();

        assert_eq!(config.job.results_dir().unwrap(), PathBuf::from("/var/results"));
        assert_eq!(config.job.max_parallel, 8);
        assert_eq!(config.job.test_timeout_secs, 60);
        assert_eq!(config.resolvers.order, vec!["exec-test"]);
        assert_eq!(config.aliases["smoke"], "./smoke.sh --fast");
        assert!(!config.output_check.enabled);
        assert_eq!(config.output_check.record, RecordMode::Stdout);
    }

    #[test]
    fn test_unknown_section_rejected() {
        assert!(load_config_str("[provider]\ntype = \"local\"\n").is_err());
    }

    #[test]
    fn test_results_dir_expands_home() {
        let config = Config::default();
        let dir = config.job.results_dir().unwrap();
        assert!(!dir.to_string_lossy().starts_with('~'));
        assert!(dir.ends_with("plexrun/job-results"));
    }

    #[test]
    fn test_missing_optional_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plexrun.toml");
        assert!(load_config_or_default(&path, false).is_ok());
        assert!(load_config_or_default(&path, true).is_err());

        std::fs::write(&path, "[job]\nmax_parallel = 3\n").unwrap();
        assert_eq!(load_config_or_default(&path, false).unwrap().job.max_parallel, 3);
    }
}
