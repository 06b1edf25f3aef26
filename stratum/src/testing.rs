//! Testing utilities for migration development and verification.
//!
//! [MigrationHarness] bundles a temporary migration tree, an in-memory
//! SQLite database and a [Migrator], so downstream projects can exercise
//! their migration flows without touching a real database or directory.

use std::fs;
use std::path::Path;

use crate::db::{Param, RunContext};
use crate::error::MigrationError;
use crate::migrator::{InitOptions, InitReport, MigrateOptions, MigrateReport, Migrator};
use crate::sqlite::SqliteConn;
use crate::MigrationConfig;

/// A migration test harness with state control and assertion helpers.
///
/// ```
/// use stratum::testing::MigrationHarness;
///
/// let mut harness = MigrationHarness::new("1.0");
/// harness.write_init_task(1, "create-users", "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);");
/// harness.init().unwrap();
///
/// harness.execute("INSERT INTO users (id, name) VALUES (1, 'alice')").unwrap();
/// harness.assert_table_exists("users");
/// let name = harness.query_one_text("SELECT name FROM users WHERE id = 1").unwrap();
/// assert_eq!(name, "alice");
/// harness.is_database_ok().unwrap();
/// ```
pub struct MigrationHarness {
    dir: tempfile::TempDir,
    conn: SqliteConn,
    migrator: Migrator,
}

impl MigrationHarness {
    /// Create a harness with an empty migration tree, the given configured
    /// target version, and an in-memory database.
    pub fn new(current_version: &str) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp migration tree");
        let migrator = Migrator::new(MigrationConfig::new(dir.path(), current_version));
        let conn = SqliteConn::open_in_memory().expect("failed to open in-memory database");
        Self {
            dir,
            conn,
            migrator,
        }
    }

    /// Root of the temporary migration tree.
    pub fn tree_root(&self) -> &Path {
        self.dir.path()
    }

    pub fn migrator(&self) -> &Migrator {
        &self.migrator
    }

    /// Write a task file into the init folder.
    pub fn write_init_task(&self, ordinal: u32, name: &str, sql: &str) {
        self.write(&format!("init/{ordinal}-{name}.sql"), sql);
    }

    /// Write a task file into a version folder under the versions root.
    pub fn write_version_task(&self, folder: &str, ordinal: u32, name: &str, sql: &str) {
        let subfolder = &self.migrator.config().subfolder;
        self.write(&format!("{subfolder}/{folder}/{ordinal}-{name}.sql"), sql);
    }

    fn write(&self, rel: &str, content: &str) {
        let path = self.dir.path().join(rel);
        fs::create_dir_all(path.parent().expect("task path has a parent"))
            .expect("failed to create task directory");
        fs::write(path, content).expect("failed to write task file");
    }

    pub fn init(&mut self) -> Result<InitReport, MigrationError> {
        self.migrator.init(&mut self.conn, &InitOptions::default())
    }

    pub fn init_with(&mut self, options: &InitOptions) -> Result<InitReport, MigrationError> {
        self.migrator.init(&mut self.conn, options)
    }

    pub fn migrate(&mut self) -> Result<MigrateReport, MigrationError> {
        self.migrator
            .migrate(&mut self.conn, &MigrateOptions::default())
    }

    pub fn migrate_with(
        &mut self,
        options: &MigrateOptions,
    ) -> Result<MigrateReport, MigrationError> {
        self.migrator.migrate(&mut self.conn, options)
    }

    pub fn reset(&mut self) -> Result<(), MigrationError> {
        self.migrator.reset(&mut self.conn)
    }

    pub fn is_database_ok(&mut self) -> Result<(), MigrationError> {
        self.migrator.is_database_ok(&mut self.conn)
    }

    /// Execute a SQL statement (for setting up test data).
    pub fn execute(&mut self, sql: &str) -> Result<(), MigrationError> {
        let mut ctx = RunContext::new(&mut self.conn);
        ctx.execute(sql, &[])?;
        Ok(())
    }

    /// Run a query expected to produce exactly one text value.
    pub fn query_one_text(&mut self, sql: &str) -> Result<String, MigrationError> {
        let mut ctx = RunContext::new(&mut self.conn);
        let rows = ctx.query(sql, &[])?;
        rows.first()
            .and_then(|r| r.text(0))
            .map(str::to_string)
            .ok_or_else(|| {
                MigrationError::Config(format!("query returned no text value: {sql}"))
            })
    }

    /// Run a query expected to produce exactly one integer value.
    pub fn query_one_int(&mut self, sql: &str) -> Result<i64, MigrationError> {
        let mut ctx = RunContext::new(&mut self.conn);
        let rows = ctx.query(sql, &[])?;
        rows.first().and_then(|r| r.int(0)).ok_or_else(|| {
            MigrationError::Config(format!("query returned no integer value: {sql}"))
        })
    }

    /// Panic if the given table does not exist.
    pub fn assert_table_exists(&mut self, name: &str) {
        let mut ctx = RunContext::new(&mut self.conn);
        let rows = ctx
            .query(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
                &[Param::Text(name)],
            )
            .expect("failed to query sqlite_master");
        assert!(
            rows.first().and_then(|r| r.int(0)).unwrap_or(0) > 0,
            "expected table '{name}' to exist"
        );
    }

    /// Ledger rows as (name, version) pairs in insertion order.
    pub fn ledger_rows(&mut self) -> Vec<(String, String)> {
        let mut ctx = RunContext::new(&mut self.conn);
        let table = &self.migrator.config().ledger_table;
        ctx.query(
            &format!("SELECT name, version FROM {table} ORDER BY id"),
            &[],
        )
        .expect("failed to read ledger")
        .iter()
        .map(|r| {
            (
                r.text(0).unwrap_or_default().to_string(),
                r.text(1).unwrap_or_default().to_string(),
            )
        })
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn harness_runs_a_full_migration_cycle() {
        let mut harness = MigrationHarness::new("1.0");
        harness.write_init_task(
            1,
            "create-users",
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);",
        );
        harness.init().unwrap();
        harness.assert_table_exists("users");

        harness.write_version_task(
            "1.0",
            1,
            "create-orders",
            "CREATE TABLE orders (id INTEGER PRIMARY KEY, user_id INTEGER);",
        );
        let report = harness.migrate().unwrap();
        assert_eq!(report.executed.len(), 1);
        harness.assert_table_exists("orders");
        harness.is_database_ok().unwrap();

        assert_eq!(
            harness.ledger_rows(),
            vec![
                ("1-create-users".to_string(), "init".to_string()),
                ("1-create-orders".to_string(), "1.0".to_string()),
            ]
        );
    }

    #[test]
    fn harness_round_trips_through_reset() {
        let mut harness = MigrationHarness::new("1.0");
        harness.write_init_task(1, "create-users", "CREATE TABLE users (id INTEGER);");
        harness.init().unwrap();
        harness.execute("INSERT INTO users (id) VALUES (1)").unwrap();
        assert_eq!(
            harness.query_one_int("SELECT COUNT(*) FROM users").unwrap(),
            1
        );

        harness.reset().unwrap();
        harness.init().unwrap();
        harness.is_database_ok().unwrap();
        assert_eq!(
            harness.query_one_int("SELECT COUNT(*) FROM users").unwrap(),
            0
        );
    }
}
