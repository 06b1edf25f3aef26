//! `stratum` is a schema-migration orchestrator: given a directory tree of
//! versioned migration task files, it determines which tasks have not yet
//! been applied to a target database and applies them in order, recording
//! progress in a ledger table so re-runs are idempotent.
//!
//! # Core concepts
//!
//! - Tasks are plain SQL files named `<ordinal>-<name>.sql`, grouped into
//!   an `init/` baseline folder and one folder per version under
//!   `versions/` (folder names start with a dotted version, free suffix
//!   allowed: `1.1-members`).
//! - The [integrity check](Migrator::integrity_check) diffs the expected
//!   task count per version against the ledger. Versions beyond the
//!   database's recorded baseline are not yet due; versions beyond the
//!   configured target are hidden unless forced.
//! - [migrate](Migrator::migrate) converges actual state to expected state
//!   under an advisory lock, inside one ambient transaction, skipping
//!   every task that already has a ledger row.
//! - Tasks that declare `-- stratum:implicit-commit` end the transaction
//!   inside the engine (DDL auto-commit); the executor treats everything
//!   up to that point as durable and continues in a fresh scope.
//! - [init](Migrator::init) bootstraps a fresh database: bookkeeping
//!   tables, the init baseline, and ledger back-fill for on-disk versions
//!   the baseline already encodes.
//!
//! # Example
//!
//! ```no_run
//! use stratum::{InitOptions, MigrateOptions, MigrationConfig, Migrator};
//! use stratum::sqlite::SqliteConn;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = MigrationConfig::new("db/migrations", "1.2");
//!     let migrator = Migrator::new(config);
//!
//!     let mut conn = SqliteConn::open("app.db")?;
//!     migrator.init(&mut conn, &InitOptions::default())?;
//!     let report = migrator.migrate(&mut conn, &MigrateOptions::default())?;
//!     for task in &report.executed {
//!         println!("applied {} ({})", task.name, task.version);
//!     }
//!     migrator.is_database_ok(&mut conn)?;
//!     Ok(())
//! }
//! ```
//!
//! # Errors
//!
//! Every error is typed and carries a stable machine code
//! ([MigrationError::code]) so pipelines can branch without parsing
//! messages: `DB_NOT_INITIALISED`, `MIGRATION_TABLE_IS_MISSING`,
//! `DB_NEEDS_MIGRATION`, `MIGRATIONS_LOCKED`, `MIGRATION_SCRIPT_FAILED`,
//! `MIGRATION_STATE_ERROR`, and so on.
//!
//! # Drivers
//!
//! The core consumes storage through the [DbConn] trait; vendor errors are
//! translated at that boundary. A SQLite driver ships behind the `sqlite`
//! feature ([sqlite::SqliteConn]); other engines implement [DbConn]
//! downstream.

mod config;
mod db;
mod error;
mod hooks;
mod integrity;
mod ledger;
mod lock;
mod migrator;
mod task;
mod version;

pub use config::MigrationConfig;
pub use db::{DbConn, DbError, DbErrorKind, DbRow, DbValue, Param, RunContext};
pub use error::MigrationError;
pub use hooks::{Hooks, RunHook, TaskHook};
pub use integrity::{IntegrityEntry, IntegrityOptions, IntegrityReport};
pub use ledger::{Ledger, LedgerEntry};
pub use lock::{LockManager, LOCK_KEY};
pub use migrator::{
    InitOptions, InitReport, MigrateOptions, MigrateReport, Migrator, TaskRef,
};
pub use task::{discover_tasks, list_version_folders, MigrationTask, INIT_VERSION};
pub use version::Version;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "testing")]
pub mod testing;
