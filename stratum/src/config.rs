//! Migration run configuration.

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::MigrationError;
use crate::version::Version;

fn default_subfolder() -> String {
    "versions".to_string()
}

fn default_ledger_table() -> String {
    "migrations".to_string()
}

fn default_lock_table() -> String {
    "migrations_lock".to_string()
}

/// Configuration consumed by [Migrator](crate::Migrator).
///
/// `current_version` is the configured target/baseline version: versions
/// beyond it are "future" and hidden from integrity results unless forced,
/// and it is the value stamped on ledger rows as `current_version`.
#[derive(Debug, Clone, Deserialize)]
pub struct MigrationConfig {
    /// Root of the migration tree (contains `init/` and the versions
    /// subfolder).
    pub migration_path: PathBuf,
    /// Configured target/baseline version, e.g. "1.2".
    pub current_version: String,
    /// Name of the per-version subfolder under `migration_path`.
    #[serde(default = "default_subfolder")]
    pub subfolder: String,
    /// Ledger table name.
    #[serde(default = "default_ledger_table")]
    pub ledger_table: String,
    /// Lock table name.
    #[serde(default = "default_lock_table")]
    pub lock_table: String,
}

impl MigrationConfig {
    pub fn new(migration_path: impl Into<PathBuf>, current_version: impl Into<String>) -> Self {
        Self {
            migration_path: migration_path.into(),
            current_version: current_version.into(),
            subfolder: default_subfolder(),
            ledger_table: default_ledger_table(),
            lock_table: default_lock_table(),
        }
    }

    /// Directory holding the init pseudo-version's tasks.
    pub fn init_dir(&self) -> PathBuf {
        self.migration_path.join(INIT_DIR)
    }

    /// Directory holding one folder per version.
    pub fn versions_dir(&self) -> PathBuf {
        self.migration_path.join(&self.subfolder)
    }

    /// The configured target version, parsed.
    pub fn target_version(&self) -> Result<Version, MigrationError> {
        Version::parse(&self.current_version).ok_or_else(|| {
            MigrationError::Config(format!(
                "current_version '{}' is not a dotted numeric version",
                self.current_version
            ))
        })
    }

    pub fn validate(&self) -> Result<(), MigrationError> {
        if self.migration_path.as_os_str().is_empty() {
            return Err(MigrationError::Config(
                "migration_path must not be empty".to_string(),
            ));
        }
        self.target_version()?;
        if self.subfolder.is_empty() {
            return Err(MigrationError::Config(
                "subfolder must not be empty".to_string(),
            ));
        }
        check_identifier("ledger_table", &self.ledger_table)?;
        check_identifier("lock_table", &self.lock_table)?;
        Ok(())
    }
}

const INIT_DIR: &str = "init";

/// Table names are interpolated into SQL; restrict them to plain
/// identifiers so configuration cannot smuggle statements in.
fn check_identifier(field: &str, value: &str) -> Result<(), MigrationError> {
    let valid = !value.is_empty()
        && value
            .chars()
            .next()
            .map(|c| c.is_ascii_alphabetic() || c == '_')
            .unwrap_or(false)
        && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(MigrationError::Config(format!(
            "{field} '{value}' is not a valid table identifier"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_applied() {
        let config = MigrationConfig::new("migrations", "1.0");
        assert_eq!(config.subfolder, "versions");
        assert_eq!(config.ledger_table, "migrations");
        assert_eq!(config.lock_table, "migrations_lock");
        assert_eq!(config.init_dir(), PathBuf::from("migrations/init"));
        assert_eq!(config.versions_dir(), PathBuf::from("migrations/versions"));
        config.validate().unwrap();
    }

    #[test]
    fn unparseable_current_version_is_a_config_error() {
        let config = MigrationConfig::new("migrations", "one.two");
        let err = config.validate().unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
        assert!(err.to_string().contains("one.two"));
    }

    #[test]
    fn table_names_must_be_plain_identifiers() {
        let mut config = MigrationConfig::new("migrations", "1.0");
        config.ledger_table = "migrations; DROP TABLE users".to_string();
        assert!(config.validate().is_err());

        let mut config = MigrationConfig::new("migrations", "1.0");
        config.lock_table = "1lock".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn subfolder_override_changes_versions_dir() {
        let mut config = MigrationConfig::new("migrations", "1.0");
        config.subfolder = "releases".to_string();
        assert_eq!(config.versions_dir(), PathBuf::from("migrations/releases"));
        config.validate().unwrap();
    }
}
