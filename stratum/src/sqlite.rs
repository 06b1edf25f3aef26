//! SQLite driver for the [DbConn](crate::DbConn) boundary.
//!
//! This is the reference driver and the test vehicle. It translates
//! rusqlite errors into the [DbErrorKind](crate::DbErrorKind) classes the
//! core branches on; the core itself never sees a vendor code.

use std::path::Path;
use std::time::Duration;

use rusqlite::types::{Value, ValueRef};
use rusqlite::Connection;

use crate::db::{DbConn, DbError, DbErrorKind, DbRow, DbValue, Param};

/// A [DbConn] over a rusqlite connection.
pub struct SqliteConn {
    conn: Connection,
}

impl SqliteConn {
    /// Open (creating if needed) a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DbError> {
        let conn = Connection::open(path).map_err(translate)?;
        Self::with_connection(conn)
    }

    /// Open an in-memory database.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory().map_err(translate)?;
        Self::with_connection(conn)
    }

    /// Wrap an existing connection.
    pub fn with_connection(conn: Connection) -> Result<Self, DbError> {
        // Ride out short-lived file locks from concurrent processes
        // instead of failing instantly.
        conn.busy_timeout(Duration::from_secs(5)).map_err(translate)?;
        Ok(Self { conn })
    }

    /// Access the wrapped connection, e.g. for application queries after
    /// migrating.
    pub fn connection(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

impl std::fmt::Debug for SqliteConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConn").finish_non_exhaustive()
    }
}

fn to_values(params: &[Param<'_>]) -> Vec<Value> {
    params
        .iter()
        .map(|p| match p {
            Param::Text(s) => Value::Text((*s).to_string()),
            Param::Int(i) => Value::Integer(*i),
            Param::Null => Value::Null,
        })
        .collect()
}

fn to_db_value(value: ValueRef<'_>) -> DbValue {
    match value {
        ValueRef::Null => DbValue::Null,
        ValueRef::Integer(i) => DbValue::Int(i),
        ValueRef::Real(f) => DbValue::Text(f.to_string()),
        ValueRef::Text(t) => DbValue::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => DbValue::Text(String::from_utf8_lossy(b).into_owned()),
    }
}

/// Map a rusqlite error onto the translated taxonomy.
fn translate(e: rusqlite::Error) -> DbError {
    let message = e.to_string();
    let kind = match &e {
        rusqlite::Error::SqliteFailure(f, _) => match f.code {
            rusqlite::ErrorCode::ConstraintViolation if message.contains("UNIQUE") => {
                DbErrorKind::DuplicateEntry
            }
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => {
                DbErrorKind::Locked
            }
            rusqlite::ErrorCode::CannotOpen | rusqlite::ErrorCode::NotADatabase => {
                DbErrorKind::MissingDatabase
            }
            _ if message.contains("no such table") => DbErrorKind::MissingTable,
            _ => DbErrorKind::Other,
        },
        _ if message.contains("no such table") => DbErrorKind::MissingTable,
        _ => DbErrorKind::Other,
    };
    DbError::new(kind, message)
}

impl DbConn for SqliteConn {
    fn execute(&mut self, sql: &str, params: &[Param<'_>]) -> Result<u64, DbError> {
        let affected = self
            .conn
            .execute(sql, rusqlite::params_from_iter(to_values(params)))
            .map_err(translate)?;
        Ok(affected as u64)
    }

    fn query(&mut self, sql: &str, params: &[Param<'_>]) -> Result<Vec<DbRow>, DbError> {
        let mut stmt = self.conn.prepare(sql).map_err(translate)?;
        let column_count = stmt.column_count();
        let mut rows = stmt
            .query(rusqlite::params_from_iter(to_values(params)))
            .map_err(translate)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(translate)? {
            let mut values = Vec::with_capacity(column_count);
            for i in 0..column_count {
                let value = row.get_ref(i).map_err(translate)?;
                values.push(to_db_value(value));
            }
            out.push(DbRow::new(values));
        }
        Ok(out)
    }

    fn execute_batch(&mut self, sql: &str) -> Result<(), DbError> {
        self.conn.execute_batch(sql).map_err(translate)
    }

    fn begin(&mut self) -> Result<(), DbError> {
        self.conn.execute_batch("BEGIN").map_err(translate)
    }

    fn commit(&mut self) -> Result<(), DbError> {
        self.conn.execute_batch("COMMIT").map_err(translate)
    }

    fn rollback(&mut self) -> Result<(), DbError> {
        self.conn.execute_batch("ROLLBACK").map_err(translate)
    }

    fn drop_all(&mut self) -> Result<(), DbError> {
        // Collect first: dropping while iterating sqlite_master would
        // invalidate the statement.
        let objects: Vec<(String, String)> = {
            let mut stmt = self
                .conn
                .prepare(
                    "SELECT type, name FROM sqlite_master \
                     WHERE name NOT LIKE 'sqlite_%' \
                     AND type IN ('trigger', 'view', 'index', 'table') \
                     ORDER BY CASE type \
                       WHEN 'trigger' THEN 0 WHEN 'view' THEN 1 \
                       WHEN 'index' THEN 2 ELSE 3 END",
                )
                .map_err(translate)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })
                .map_err(translate)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(translate)?
        };

        self.conn
            .execute_batch("PRAGMA foreign_keys = OFF")
            .map_err(translate)?;
        for (object_type, name) in objects {
            let keyword = match object_type.as_str() {
                "trigger" => "TRIGGER",
                "view" => "VIEW",
                "index" => "INDEX",
                _ => "TABLE",
            };
            self.conn
                .execute_batch(&format!("DROP {keyword} IF EXISTS \"{name}\""))
                .map_err(translate)?;
        }
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON")
            .map_err(translate)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execute_and_query_round_trip() {
        let mut conn = SqliteConn::open_in_memory().unwrap();
        conn.execute("CREATE TABLE t (id INTEGER, name TEXT)", &[])
            .unwrap();
        let affected = conn
            .execute(
                "INSERT INTO t (id, name) VALUES (?, ?)",
                &[Param::Int(1), Param::Text("alice")],
            )
            .unwrap();
        assert_eq!(affected, 1);

        let rows = conn
            .query("SELECT id, name FROM t WHERE id = ?", &[Param::Int(1)])
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].int(0), Some(1));
        assert_eq!(rows[0].text(1), Some("alice"));
    }

    #[test]
    fn null_values_round_trip() {
        let mut conn = SqliteConn::open_in_memory().unwrap();
        conn.execute("CREATE TABLE t (id INTEGER, name TEXT)", &[])
            .unwrap();
        conn.execute(
            "INSERT INTO t (id, name) VALUES (?, ?)",
            &[Param::Int(1), Param::Null],
        )
        .unwrap();
        let rows = conn.query("SELECT name FROM t", &[]).unwrap();
        assert!(rows[0].is_null(0));
        assert_eq!(rows[0].text(0), None);
    }

    #[test]
    fn missing_table_is_translated() {
        let mut conn = SqliteConn::open_in_memory().unwrap();
        let err = conn.query("SELECT * FROM nothing_here", &[]).unwrap_err();
        assert_eq!(err.kind, DbErrorKind::MissingTable);
    }

    #[test]
    fn unique_violation_is_translated() {
        let mut conn = SqliteConn::open_in_memory().unwrap();
        conn.execute("CREATE TABLE t (id INTEGER PRIMARY KEY, k TEXT UNIQUE)", &[])
            .unwrap();
        conn.execute("INSERT INTO t (k) VALUES ('a')", &[]).unwrap();
        let err = conn
            .execute("INSERT INTO t (k) VALUES ('a')", &[])
            .unwrap_err();
        assert_eq!(err.kind, DbErrorKind::DuplicateEntry);
    }

    #[test]
    fn execute_batch_runs_multiple_statements() {
        let mut conn = SqliteConn::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE a (id INTEGER);\n\
             CREATE TABLE b (id INTEGER);\n\
             INSERT INTO a (id) VALUES (1);",
        )
        .unwrap();
        let rows = conn.query("SELECT COUNT(*) FROM a", &[]).unwrap();
        assert_eq!(rows[0].int(0), Some(1));
    }

    #[test]
    fn drop_all_leaves_an_empty_schema() {
        let mut conn = SqliteConn::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE t (id INTEGER, k TEXT);\n\
             CREATE UNIQUE INDEX idx_t_k ON t (k);\n\
             CREATE VIEW v AS SELECT id FROM t;",
        )
        .unwrap();
        conn.drop_all().unwrap();
        let rows = conn
            .query(
                "SELECT COUNT(*) FROM sqlite_master WHERE name NOT LIKE 'sqlite_%'",
                &[],
            )
            .unwrap();
        assert_eq!(rows[0].int(0), Some(0));
    }

    #[test]
    fn transactions_commit_and_roll_back() {
        let mut conn = SqliteConn::open_in_memory().unwrap();
        conn.execute("CREATE TABLE t (id INTEGER)", &[]).unwrap();

        conn.begin().unwrap();
        conn.execute("INSERT INTO t (id) VALUES (1)", &[]).unwrap();
        conn.commit().unwrap();

        conn.begin().unwrap();
        conn.execute("INSERT INTO t (id) VALUES (2)", &[]).unwrap();
        conn.rollback().unwrap();

        let rows = conn.query("SELECT id FROM t", &[]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].int(0), Some(1));
    }
}
