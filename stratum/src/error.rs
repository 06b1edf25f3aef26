//! Error taxonomy for the migration orchestrator.
//!
//! Every variant carries a stable machine-readable code (see
//! [MigrationError::code]) so that deployment tooling can branch on the
//! failure class without parsing messages. Messages name the offending
//! artifact (task, table, version, path) and suggest the corrective action.

use std::path::PathBuf;

use crate::db::DbError;

/// Error type for the stratum crate.
#[derive(thiserror::Error, Debug)]
pub enum MigrationError {
    /// Missing or malformed configuration. The operator must fix the
    /// configuration files; retrying without changes will fail again.
    #[error("configuration error: {0}")]
    Config(String),

    /// The target database has not been initialized (missing database or
    /// missing ledger table). Actionable by running `init`.
    #[error("{message}")]
    NotInitialized {
        code: &'static str,
        message: String,
    },

    /// The database is initialized but has pending migrations. Raised only
    /// by the health check; actionable by running `migrate`.
    #[error(
        "database schema is behind: version(s) {} have pending migration tasks. Run `migrate` to bring the schema up to date",
        versions.join(", ")
    )]
    NeedsMigration { versions: Vec<String> },

    /// Another run holds the advisory lock. Fatal for the current call,
    /// retryable once the other run finishes (or the lock is cleared).
    #[error("{0}")]
    Locked(String),

    /// A ledger row already exists for this (name, version) pair. This is
    /// the benign skip signal consulted before re-running a task; it is
    /// absorbed inside the executor and never crosses the API boundary.
    #[error("migration task '{name}' (version {version}) has already been recorded")]
    AlreadyRecorded { name: String, version: String },

    /// A migration directory that was expected to exist does not.
    /// Tolerated as "zero tasks" for the init version only.
    #[error("migration path does not exist: {}", .0.display())]
    PathMissing(PathBuf),

    /// A task body failed. Rolls back whatever is still transactional and
    /// unconditionally releases the lock.
    #[error("migration task '{task}' (version {version}) failed: {message}")]
    ScriptFailed {
        version: String,
        task: String,
        message: String,
    },

    /// The ledger records more executed tasks than exist on disk for a
    /// version. Requires manual operator inspection; never auto-repaired.
    #[error(
        "migration state for version {version} is inconsistent: {actual} task(s) recorded but only {expected} expected. \
         The ledger has entries for tasks that no longer exist; inspect the `migrations` table manually"
    )]
    StateError {
        version: String,
        expected: usize,
        actual: usize,
    },

    /// Filesystem error while reading the migration tree.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Untranslated storage-engine error.
    #[error(transparent)]
    Db(#[from] DbError),
}

impl MigrationError {
    /// The database exists but was never initialized.
    pub fn not_initialized(detail: impl Into<String>) -> Self {
        MigrationError::NotInitialized {
            code: "DB_NOT_INITIALISED",
            message: format!(
                "database is not initialized ({}). Run `init` before migrating",
                detail.into()
            ),
        }
    }

    /// The ledger table is missing from an otherwise reachable database.
    pub fn ledger_table_missing(detail: impl Into<String>) -> Self {
        MigrationError::NotInitialized {
            code: "MIGRATION_TABLE_IS_MISSING",
            message: format!(
                "migration ledger table is missing ({}). Run `init` to create it",
                detail.into()
            ),
        }
    }

    /// Stable machine-readable code for this error class.
    pub fn code(&self) -> &'static str {
        match self {
            MigrationError::Config(_) => "CONFIG_ERROR",
            MigrationError::NotInitialized { code, .. } => code,
            MigrationError::NeedsMigration { .. } => "DB_NEEDS_MIGRATION",
            MigrationError::Locked(_) => "MIGRATIONS_LOCKED",
            MigrationError::AlreadyRecorded { .. } => "MIGRATION_ALREADY_RECORDED",
            MigrationError::PathMissing(_) => "MIGRATION_PATH_MISSING",
            MigrationError::ScriptFailed { .. } => "MIGRATION_SCRIPT_FAILED",
            MigrationError::StateError { .. } => "MIGRATION_STATE_ERROR",
            MigrationError::Io { .. } => "IO_ERROR",
            MigrationError::Db(_) => "DB_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{DbErrorKind, DbError};

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            MigrationError::Config("x".into()).code(),
            "CONFIG_ERROR"
        );
        assert_eq!(
            MigrationError::not_initialized("no ledger rows").code(),
            "DB_NOT_INITIALISED"
        );
        assert_eq!(
            MigrationError::ledger_table_missing("no such table").code(),
            "MIGRATION_TABLE_IS_MISSING"
        );
        assert_eq!(
            MigrationError::NeedsMigration {
                versions: vec!["1.0".into()]
            }
            .code(),
            "DB_NEEDS_MIGRATION"
        );
        assert_eq!(
            MigrationError::StateError {
                version: "1.0".into(),
                expected: 1,
                actual: 2
            }
            .code(),
            "MIGRATION_STATE_ERROR"
        );
        assert_eq!(
            MigrationError::Db(DbError::new(DbErrorKind::Other, "boom")).code(),
            "DB_ERROR"
        );
    }

    #[test]
    fn messages_name_the_offending_artifact() {
        let err = MigrationError::ScriptFailed {
            version: "1.2".into(),
            task: "3-add-index".into(),
            message: "syntax error".into(),
        };
        let text = err.to_string();
        assert!(text.contains("3-add-index"));
        assert!(text.contains("1.2"));
        assert!(text.contains("syntax error"));

        let err = MigrationError::StateError {
            version: "1.0".into(),
            expected: 2,
            actual: 3,
        };
        let text = err.to_string();
        assert!(text.contains("1.0"));
        assert!(text.contains("manually"));
    }
}
