//! Storage capability boundary.
//!
//! The core never talks to a database driver directly: every read and write
//! goes through the [DbConn] trait, and every vendor error is translated by
//! the driver into a [DbErrorKind] before the core sees it. The core
//! branches only on the translated kind, never on vendor codes.
//!
//! [RunContext] is the explicit per-run value threaded through every
//! operation. It carries the active connection and whether the ambient
//! transaction is open, replacing any notion of global connection state, so
//! several orchestrators can run concurrently in-process without
//! interference.

/// Translated storage error classes the core is allowed to branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbErrorKind {
    /// The target database/schema does not exist or none is selected.
    MissingDatabase,
    /// A table the statement references does not exist.
    MissingTable,
    /// A unique-constraint violation on insert.
    DuplicateEntry,
    /// An indexed key exceeds the engine's maximum length.
    KeyTooLong,
    /// The engine-level lock (file lock, metadata lock) is held elsewhere.
    Locked,
    /// Anything else.
    Other,
}

/// A storage error as seen by the core: a translated kind plus the
/// driver's message (which retains the vendor detail for operators).
#[derive(thiserror::Error, Debug, Clone)]
#[error("{message}")]
pub struct DbError {
    pub kind: DbErrorKind,
    pub message: String,
}

impl DbError {
    pub fn new(kind: DbErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(DbErrorKind::Other, message)
    }
}

/// A positional statement parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Param<'a> {
    Text(&'a str),
    Int(i64),
    Null,
}

/// A value read back from the database.
#[derive(Debug, Clone, PartialEq)]
pub enum DbValue {
    Null,
    Int(i64),
    Text(String),
}

/// One result row. Columns are addressed by position, in SELECT order.
#[derive(Debug, Clone)]
pub struct DbRow {
    values: Vec<DbValue>,
}

impl DbRow {
    pub fn new(values: Vec<DbValue>) -> Self {
        Self { values }
    }

    pub fn text(&self, idx: usize) -> Option<&str> {
        match self.values.get(idx) {
            Some(DbValue::Text(s)) => Some(s),
            _ => None,
        }
    }

    pub fn int(&self, idx: usize) -> Option<i64> {
        match self.values.get(idx) {
            Some(DbValue::Int(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn is_null(&self, idx: usize) -> bool {
        matches!(self.values.get(idx), Some(DbValue::Null) | None)
    }
}

/// Connection capability consumed by the core.
///
/// Statements use `?` positional placeholders; drivers for engines with a
/// different placeholder syntax rewrite them at this boundary. The
/// bookkeeping DDL emitted by the core is deliberately plain; a driver may
/// likewise rewrite it for its dialect.
pub trait DbConn {
    /// Execute one statement, returning the number of affected rows.
    fn execute(&mut self, sql: &str, params: &[Param<'_>]) -> Result<u64, DbError>;

    /// Run one query, returning all rows.
    fn query(&mut self, sql: &str, params: &[Param<'_>]) -> Result<Vec<DbRow>, DbError>;

    /// Execute a multi-statement SQL script (a task body).
    fn execute_batch(&mut self, sql: &str) -> Result<(), DbError>;

    fn begin(&mut self) -> Result<(), DbError>;
    fn commit(&mut self) -> Result<(), DbError>;
    fn rollback(&mut self) -> Result<(), DbError>;

    /// Drop every object in the target schema, bookkeeping included.
    /// Inherently engine-specific, which is why it lives on the driver.
    fn drop_all(&mut self) -> Result<(), DbError>;
}

/// Per-run execution context: the shared connection plus the state of the
/// ambient transaction.
///
/// All task, hook, ledger and lock operations within one run go through one
/// `RunContext`; nothing opens a competing transaction. The one sanctioned
/// transition outside `begin`/`commit`/`rollback` is
/// [acknowledge_implicit_commit](RunContext::acknowledge_implicit_commit),
/// for tasks whose statements end the transaction inside the engine.
pub struct RunContext<'a> {
    conn: &'a mut dyn DbConn,
    in_tx: bool,
}

impl<'a> RunContext<'a> {
    pub fn new(conn: &'a mut dyn DbConn) -> Self {
        Self { conn, in_tx: false }
    }

    pub fn in_transaction(&self) -> bool {
        self.in_tx
    }

    /// Open the ambient transaction. No-op if one is already open.
    pub fn begin(&mut self) -> Result<(), DbError> {
        if !self.in_tx {
            self.conn.begin()?;
            self.in_tx = true;
        }
        Ok(())
    }

    /// Commit the ambient transaction. No-op if none is open (the scope may
    /// have been implicitly closed by the engine).
    pub fn commit(&mut self) -> Result<(), DbError> {
        if self.in_tx {
            self.conn.commit()?;
            self.in_tx = false;
        }
        Ok(())
    }

    /// Roll back the ambient transaction. No-op if none is open: after an
    /// implicit commit there is nothing left to abort, and treating that as
    /// corruption is exactly what this type exists to avoid.
    pub fn rollback(&mut self) -> Result<(), DbError> {
        if self.in_tx {
            self.conn.rollback()?;
            self.in_tx = false;
        }
        Ok(())
    }

    /// Record the `transaction-active -> transaction-implicitly-closed`
    /// transition after a task that auto-commits inside the engine.
    ///
    /// Engines that really did auto-commit treat the extra COMMIT as a
    /// no-op; engines that did not (the statement class is only implicit on
    /// some engines) are committed here, so downstream durability semantics
    /// converge: everything up to this point is durable, nothing after it
    /// is protected by the outer rollback.
    pub fn acknowledge_implicit_commit(&mut self) {
        if self.in_tx {
            let _ = self.conn.commit();
            self.in_tx = false;
        }
    }

    pub fn execute(&mut self, sql: &str, params: &[Param<'_>]) -> Result<u64, DbError> {
        self.conn.execute(sql, params)
    }

    pub fn query(&mut self, sql: &str, params: &[Param<'_>]) -> Result<Vec<DbRow>, DbError> {
        self.conn.query(sql, params)
    }

    pub fn execute_batch(&mut self, sql: &str) -> Result<(), DbError> {
        self.conn.execute_batch(sql)
    }

    pub fn drop_all(&mut self) -> Result<(), DbError> {
        self.in_tx = false;
        self.conn.drop_all()
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use crate::sqlite::SqliteConn;

    #[test]
    fn begin_commit_round_trip() {
        let mut conn = SqliteConn::open_in_memory().unwrap();
        let mut ctx = RunContext::new(&mut conn);
        assert!(!ctx.in_transaction());
        ctx.begin().unwrap();
        assert!(ctx.in_transaction());
        ctx.execute("CREATE TABLE t (id INTEGER PRIMARY KEY)", &[])
            .unwrap();
        ctx.execute("INSERT INTO t (id) VALUES (1)", &[]).unwrap();
        ctx.commit().unwrap();
        assert!(!ctx.in_transaction());
        let rows = ctx.query("SELECT COUNT(*) FROM t", &[]).unwrap();
        assert_eq!(rows[0].int(0), Some(1));
    }

    #[test]
    fn rollback_discards_uncommitted_work() {
        let mut conn = SqliteConn::open_in_memory().unwrap();
        let mut ctx = RunContext::new(&mut conn);
        ctx.execute("CREATE TABLE t (id INTEGER PRIMARY KEY)", &[])
            .unwrap();
        ctx.begin().unwrap();
        ctx.execute("INSERT INTO t (id) VALUES (1)", &[]).unwrap();
        ctx.rollback().unwrap();
        let rows = ctx.query("SELECT COUNT(*) FROM t", &[]).unwrap();
        assert_eq!(rows[0].int(0), Some(0));
    }

    #[test]
    fn rollback_without_transaction_is_a_noop() {
        let mut conn = SqliteConn::open_in_memory().unwrap();
        let mut ctx = RunContext::new(&mut conn);
        ctx.rollback().unwrap();
        ctx.commit().unwrap();
    }

    #[test]
    fn implicit_commit_makes_prior_work_durable() {
        let mut conn = SqliteConn::open_in_memory().unwrap();
        let mut ctx = RunContext::new(&mut conn);
        ctx.begin().unwrap();
        ctx.execute("CREATE TABLE t (id INTEGER PRIMARY KEY)", &[])
            .unwrap();
        ctx.execute("INSERT INTO t (id) VALUES (1)", &[]).unwrap();
        // The engine "ended" the transaction here; the scope is closed.
        ctx.acknowledge_implicit_commit();
        assert!(!ctx.in_transaction());

        // Work in a fresh scope is still protected.
        ctx.begin().unwrap();
        ctx.execute("INSERT INTO t (id) VALUES (2)", &[]).unwrap();
        ctx.rollback().unwrap();

        let rows = ctx.query("SELECT id FROM t ORDER BY id", &[]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].int(0), Some(1));
    }
}
