//! The migration ledger: the persisted record of executed tasks.
//!
//! One row per executed (name, version) pair. Rows are inserted after
//! successful task execution, or directly during init backfill; they are
//! never mutated, and deleted only by a full reset.

use crate::config::MigrationConfig;
use crate::db::{DbError, DbErrorKind, Param, RunContext};
use crate::error::MigrationError;
use crate::task::INIT_VERSION;

/// One persisted ledger row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub id: i64,
    pub name: String,
    pub version: String,
    /// The configured current_version at the time this row was inserted.
    pub current_version: String,
}

/// Ledger operations over the configured table.
pub struct Ledger<'a> {
    table: &'a str,
}

impl<'a> Ledger<'a> {
    pub fn new(config: &'a MigrationConfig) -> Self {
        Self {
            table: &config.ledger_table,
        }
    }

    /// Create the ledger table and its uniqueness guard if absent.
    pub fn ensure_table(&self, ctx: &mut RunContext<'_>) -> Result<(), MigrationError> {
        ctx.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {t} (\
                 id INTEGER PRIMARY KEY AUTOINCREMENT, \
                 name TEXT NOT NULL, \
                 version TEXT NOT NULL, \
                 current_version TEXT NOT NULL)",
                t = self.table
            ),
            &[],
        )
        .map_err(translate_bootstrap_error)?;
        ctx.execute(
            &format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_{t}_name_version ON {t} (name, version)",
                t = self.table
            ),
            &[],
        )
        .map_err(translate_bootstrap_error)?;
        Ok(())
    }

    /// Whether a row exists for this (name, version) pair.
    pub fn exists(
        &self,
        ctx: &mut RunContext<'_>,
        name: &str,
        version: &str,
    ) -> Result<bool, MigrationError> {
        let rows = ctx
            .query(
                &format!(
                    "SELECT COUNT(*) FROM {t} WHERE name = ? AND version = ?",
                    t = self.table
                ),
                &[Param::Text(name), Param::Text(version)],
            )
            .map_err(translate_read_error)?;
        Ok(rows.first().and_then(|r| r.int(0)).unwrap_or(0) > 0)
    }

    /// Record a task as executed.
    ///
    /// Fails with [MigrationError::AlreadyRecorded] when a row for the pair
    /// exists, both on the pre-check and on a races-losing duplicate
    /// insert. Callers treat that as "skip this task", never as fatal.
    pub fn record_executed(
        &self,
        ctx: &mut RunContext<'_>,
        name: &str,
        version: &str,
        baseline: &str,
    ) -> Result<(), MigrationError> {
        if self.exists(ctx, name, version)? {
            return Err(MigrationError::AlreadyRecorded {
                name: name.to_string(),
                version: version.to_string(),
            });
        }
        let result = ctx.execute(
            &format!(
                "INSERT INTO {t} (name, version, current_version) VALUES (?, ?, ?)",
                t = self.table
            ),
            &[
                Param::Text(name),
                Param::Text(version),
                Param::Text(baseline),
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(e) if e.kind == DbErrorKind::DuplicateEntry => {
                Err(MigrationError::AlreadyRecorded {
                    name: name.to_string(),
                    version: version.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// All rows recorded for one version, oldest first.
    pub fn entries_for_version(
        &self,
        ctx: &mut RunContext<'_>,
        version: &str,
    ) -> Result<Vec<LedgerEntry>, MigrationError> {
        let rows = ctx
            .query(
                &format!(
                    "SELECT id, name, version, current_version FROM {t} WHERE version = ? ORDER BY id",
                    t = self.table
                ),
                &[Param::Text(version)],
            )
            .map_err(translate_read_error)?;
        rows.iter().map(parse_entry).collect()
    }

    /// Every row across all versions in one round trip.
    pub fn all_entries(&self, ctx: &mut RunContext<'_>) -> Result<Vec<LedgerEntry>, MigrationError> {
        let rows = ctx
            .query(
                &format!(
                    "SELECT id, name, version, current_version FROM {t} ORDER BY id",
                    t = self.table
                ),
                &[],
            )
            .map_err(translate_read_error)?;
        rows.iter().map(parse_entry).collect()
    }

    /// The baseline version stored on the init rows, or None when the
    /// database was never initialized.
    pub fn baseline_version(
        &self,
        ctx: &mut RunContext<'_>,
    ) -> Result<Option<String>, MigrationError> {
        let rows = ctx
            .query(
                &format!(
                    "SELECT current_version FROM {t} WHERE version = ? ORDER BY id LIMIT 1",
                    t = self.table
                ),
                &[Param::Text(INIT_VERSION)],
            )
            .map_err(translate_read_error)?;
        Ok(rows.first().and_then(|r| r.text(0)).map(str::to_string))
    }
}

fn parse_entry(row: &crate::db::DbRow) -> Result<LedgerEntry, MigrationError> {
    let malformed = || DbError::other("malformed ledger row");
    Ok(LedgerEntry {
        id: row.int(0).ok_or_else(malformed)?,
        name: row.text(1).ok_or_else(malformed)?.to_string(),
        version: row.text(2).ok_or_else(malformed)?.to_string(),
        current_version: row.text(3).ok_or_else(malformed)?.to_string(),
    })
}

/// Translate ledger read failures into the initialization taxonomy: the
/// operator's fix is running `init`, and tooling branches on the code.
fn translate_read_error(e: DbError) -> MigrationError {
    match e.kind {
        DbErrorKind::MissingDatabase => MigrationError::not_initialized(e.message),
        DbErrorKind::MissingTable => MigrationError::ledger_table_missing(e.message),
        _ => e.into(),
    }
}

/// A bootstrap DDL collision with a concurrent process surfaces as the
/// lock class rather than a generic storage error.
fn translate_bootstrap_error(e: DbError) -> MigrationError {
    match e.kind {
        DbErrorKind::Locked => MigrationError::Locked(format!(
            "another migration run is bootstrapping the same database: {}",
            e.message
        )),
        _ => e.into(),
    }
}
