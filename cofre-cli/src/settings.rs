//! Configuration loading and validation for the CLI.
//!
//! Values come from an optional TOML file and from `COFRE_*` environment
//! variables, environment taking precedence. The master key is read from
//! `DATA_ENCRYPTION_KEY` (or `data_encryption_key` in the file).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use cofre::key_manager::{KeyManager, KEY_ENV_VAR};
use cofre::migration::{FailurePolicy, MigrationOptions};
use cofre::schema::{builtin, CollectionSchema};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Validated CLI settings.
#[derive(Debug, Deserialize)]
pub struct Settings {
    /// Master key, hex or base64. Required by every command but `keygen`.
    #[serde(default)]
    pub data_encryption_key: Option<SecretString>,

    /// Directory of the file document store.
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,

    /// Collections migrated when none are named on the command line.
    #[serde(default = "default_collections")]
    pub collections: Vec<String>,

    /// Documents processed concurrently.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Record failing documents and keep going instead of aborting.
    #[serde(default)]
    pub continue_on_error: bool,

    /// Scanned documents between progress log lines.
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,

    /// Tracing filter (e.g. `"info"`, `"cofre=debug"`). `RUST_LOG` overrides it.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_store_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_collections() -> Vec<String> {
    builtin::NAMES.iter().map(ToString::to_string).collect()
}
fn default_concurrency() -> usize {
    cofre::migration::DEFAULT_CONCURRENCY
}
fn default_progress_interval() -> u64 {
    cofre::migration::DEFAULT_PROGRESS_INTERVAL
}
fn default_log_level() -> String {
    "info".into()
}

/// `COFRE_*` variables. `COFRE_COLLECTIONS` is a comma-separated list.
fn environment() -> config::Environment {
    config::Environment::with_prefix("COFRE")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("collections")
}

impl Settings {
    /// Loads settings from `file` (if given) and the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be read or a value is invalid.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        Self::build(file, environment(), std::env::var(KEY_ENV_VAR).ok())
    }

    fn build(
        file: Option<&Path>,
        environment: config::Environment,
        key: Option<String>,
    ) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let cfg = builder
            .add_source(environment)
            .set_override_option("data_encryption_key", key)
            .context("failed to apply key override")?
            .build()
            .context("failed to build configuration")?;

        let settings: Self =
            cfg.try_deserialize().context("failed to deserialise configuration")?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            anyhow::bail!("COFRE_CONCURRENCY must be > 0");
        }
        if self.log_level.trim().is_empty() {
            anyhow::bail!("COFRE_LOG_LEVEL must not be empty");
        }
        for name in &self.collections {
            if builtin::by_name(name).is_none() {
                anyhow::bail!(
                    "unknown collection {name:?} (expected one of: {})",
                    builtin::NAMES.join(", ")
                );
            }
        }
        Ok(())
    }

    /// Builds the key manager from the configured master key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is absent or malformed.
    pub fn key_manager(&self) -> Result<KeyManager> {
        let raw = self
            .data_encryption_key
            .as_ref()
            .with_context(|| format!("{KEY_ENV_VAR} is required"))?;
        KeyManager::from_config(raw.expose_secret()).context("invalid master key")
    }

    /// Resolves collection names to their schemas.
    ///
    /// # Errors
    ///
    /// Returns an error for names without a built-in schema.
    pub fn schemas(&self, names: &[String]) -> Result<Vec<CollectionSchema>> {
        let names = if names.is_empty() { &self.collections } else { names };
        names
            .iter()
            .map(|name| {
                builtin::by_name(name).with_context(|| format!("unknown collection {name:?}"))
            })
            .collect()
    }

    /// Migration options derived from these settings.
    #[must_use]
    pub const fn migration_options(&self) -> MigrationOptions {
        MigrationOptions {
            concurrency: self.concurrency,
            failure_policy: if self.continue_on_error {
                FailurePolicy::Continue
            } else {
                FailurePolicy::Abort
            },
            progress_interval: self.progress_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn isolated_env() -> config::Environment {
        config::Environment::with_prefix("COFRE_CLI_TEST_UNSET")
    }

    #[test]
    fn defaults_are_correct() {
        let settings = Settings::build(None, isolated_env(), None).unwrap();
        assert_eq!(settings.store_dir, PathBuf::from("./data"));
        assert_eq!(settings.collections, ["users", "tools", "store_items", "cash_cuts"]);
        assert_eq!(settings.concurrency, 8);
        assert!(!settings.continue_on_error);
        assert_eq!(settings.log_level, "info");
        assert_eq!(settings.log_format, LogFormat::Pretty);
        assert!(settings.data_encryption_key.is_none());
    }

    #[test]
    fn key_is_required_for_key_manager() {
        let settings = Settings::build(None, isolated_env(), None).unwrap();
        let err = settings.key_manager().unwrap_err();
        assert!(err.to_string().contains(KEY_ENV_VAR));
    }

    #[test]
    fn key_override_builds_key_manager() {
        let settings = Settings::build(None, isolated_env(), Some("11".repeat(32))).unwrap();
        assert!(settings.key_manager().is_ok());
    }

    #[test]
    fn malformed_key_is_rejected_without_echo() {
        let settings = Settings::build(None, isolated_env(), Some("deadbeef".into())).unwrap();
        let err = format!("{:#}", settings.key_manager().unwrap_err());
        assert!(!err.contains("deadbeef"));
    }

    #[test]
    fn debug_output_redacts_key() {
        let key = "ab".repeat(32);
        let settings = Settings::build(None, isolated_env(), Some(key.clone())).unwrap();
        assert!(!format!("{settings:?}").contains(&key));
    }

    #[test]
    fn file_values_are_loaded() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "store_dir = \"/srv/cofre\"\nconcurrency = 2\ncontinue_on_error = true\n\
             collections = [\"users\"]\nlog_format = \"json\""
        )
        .unwrap();

        let settings = Settings::build(Some(file.path()), isolated_env(), None).unwrap();
        assert_eq!(settings.store_dir, PathBuf::from("/srv/cofre"));
        assert_eq!(settings.collections, ["users"]);
        assert_eq!(settings.log_format, LogFormat::Json);

        let options = settings.migration_options();
        assert_eq!(options.concurrency, 2);
        assert_eq!(options.failure_policy, FailurePolicy::Continue);
    }

    #[test]
    fn collections_list_from_environment() {
        let vars = [
            ("COFRE_COLLECTIONS".to_string(), "users,tools".to_string()),
            ("COFRE_CONCURRENCY".to_string(), "3".to_string()),
        ];
        let env = environment().source(Some(vars.into_iter().collect()));

        let settings = Settings::build(None, env, None).unwrap();
        assert_eq!(settings.collections, ["users", "tools"]);
        assert_eq!(settings.concurrency, 3);
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "concurrency = 0").unwrap();
        assert!(Settings::build(Some(file.path()), isolated_env(), None).is_err());
    }

    #[test]
    fn validate_rejects_unknown_collection() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "collections = [\"sessions\"]").unwrap();
        assert!(Settings::build(Some(file.path()), isolated_env(), None).is_err());
    }

    #[test]
    fn schemas_prefers_explicit_names() {
        let settings = Settings::build(None, isolated_env(), None).unwrap();
        let names: Vec<String> = settings
            .schemas(&["tools".to_string()])
            .unwrap()
            .iter()
            .map(|schema| schema.name().to_string())
            .collect();
        assert_eq!(names, ["tools"]);
        assert_eq!(settings.schemas(&[]).unwrap().len(), 4);
        assert!(settings.schemas(&["nope".to_string()]).is_err());
    }
}
