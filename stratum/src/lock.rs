//! Advisory lock preventing concurrent migration runs.
//!
//! A single sentinel row in the lock table carries `acquired_at` /
//! `released_at` stamps. The row is free when it has never been acquired or
//! when its release stamp is at or after its acquire stamp. Acquisition is
//! one conditional UPDATE, so two runs racing for the lock cannot both win:
//! whichever statement executes second matches zero rows.
//!
//! Release runs on every exit path of a run. If a process is hard-killed
//! mid-run the lock stays held; the documented recovery is clearing it
//! manually:
//!
//! ```sql
//! UPDATE migrations_lock SET released_at = acquired_at WHERE lock_key = 'migrations';
//! ```

use chrono::{SecondsFormat, Utc};

use crate::config::MigrationConfig;
use crate::db::{DbError, DbErrorKind, Param, RunContext};
use crate::error::MigrationError;

/// Fixed sentinel key of the single lock row.
pub const LOCK_KEY: &str = "migrations";

/// Lock operations over the configured table.
pub struct LockManager<'a> {
    table: &'a str,
}

impl<'a> LockManager<'a> {
    pub fn new(config: &'a MigrationConfig) -> Self {
        Self {
            table: &config.lock_table,
        }
    }

    /// Create the lock table and seed its sentinel row if absent.
    ///
    /// Creation can collide with another process bootstrapping the same
    /// database; that surfaces as [MigrationError::Locked] (retry later),
    /// not as a generic storage error.
    pub fn ensure_table(&self, ctx: &mut RunContext<'_>) -> Result<(), MigrationError> {
        ctx.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {t} (\
                 lock_key TEXT NOT NULL UNIQUE, \
                 acquired_at TEXT, \
                 released_at TEXT)",
                t = self.table
            ),
            &[],
        )
        .map_err(|e| self.translate_contention(e))?;

        let rows = ctx
            .query(
                &format!("SELECT COUNT(*) FROM {t} WHERE lock_key = ?", t = self.table),
                &[Param::Text(LOCK_KEY)],
            )
            .map_err(|e| self.translate_contention(e))?;
        if rows.first().and_then(|r| r.int(0)).unwrap_or(0) == 0 {
            let result = ctx.execute(
                &format!(
                    "INSERT INTO {t} (lock_key, acquired_at, released_at) VALUES (?, NULL, NULL)",
                    t = self.table
                ),
                &[Param::Text(LOCK_KEY)],
            );
            match result {
                Ok(_) => {}
                // Lost the seeding race to a concurrent bootstrap.
                Err(e) if e.kind == DbErrorKind::DuplicateEntry => {
                    return Err(self.translate_contention(e));
                }
                Err(e) => return Err(self.translate_contention(e)),
            }
        }
        Ok(())
    }

    /// Acquire the lock inside the active transaction.
    ///
    /// The conditional UPDATE stamps `acquired_at` only when the row is
    /// free; zero affected rows means another run holds it.
    pub fn acquire(&self, ctx: &mut RunContext<'_>) -> Result<(), MigrationError> {
        let now = timestamp();
        let affected = ctx
            .execute(
                &format!(
                    "UPDATE {t} SET acquired_at = ? \
                     WHERE lock_key = ? \
                     AND (acquired_at IS NULL \
                          OR (released_at IS NOT NULL AND released_at >= acquired_at))",
                    t = self.table
                ),
                &[Param::Text(&now), Param::Text(LOCK_KEY)],
            )
            .map_err(|e| self.translate_contention(e))?;

        if affected == 0 {
            return Err(MigrationError::Locked(format!(
                "another migration run holds the lock on table '{t}'. \
                 Wait for it to finish, or if it crashed, clear the lock manually: \
                 UPDATE {t} SET released_at = acquired_at WHERE lock_key = '{k}'",
                t = self.table,
                k = LOCK_KEY
            )));
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(lock_table = self.table, "migration lock acquired");
        Ok(())
    }

    /// Stamp the release timestamp. Invoked on every exit path of a run;
    /// after a rollback this executes in autocommit scope so the stamp
    /// survives the aborted transaction.
    pub fn release(&self, ctx: &mut RunContext<'_>) -> Result<(), MigrationError> {
        let now = timestamp();
        ctx.execute(
            &format!(
                "UPDATE {t} SET released_at = ? WHERE lock_key = ?",
                t = self.table
            ),
            &[Param::Text(&now), Param::Text(LOCK_KEY)],
        )?;
        #[cfg(feature = "tracing")]
        tracing::debug!(lock_table = self.table, "migration lock released");
        Ok(())
    }

    /// Read-only probe, used by status reporting.
    pub fn is_locked(&self, ctx: &mut RunContext<'_>) -> Result<bool, MigrationError> {
        let rows = ctx.query(
            &format!(
                "SELECT acquired_at, released_at FROM {t} WHERE lock_key = ?",
                t = self.table
            ),
            &[Param::Text(LOCK_KEY)],
        )?;
        let row = match rows.first() {
            Some(r) => r,
            None => return Ok(false),
        };
        let acquired = row.text(0);
        let released = row.text(1);
        Ok(match (acquired, released) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(a), Some(r)) => r < a,
        })
    }

    fn translate_contention(&self, e: DbError) -> MigrationError {
        match e.kind {
            DbErrorKind::Locked | DbErrorKind::DuplicateEntry => MigrationError::Locked(format!(
                "concurrent migration run detected while preparing lock table '{}': {}",
                self.table, e.message
            )),
            _ => e.into(),
        }
    }
}

/// Fixed-width UTC stamp so lexicographic comparison in SQL matches
/// chronological order.
fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}
