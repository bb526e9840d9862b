//! SQLite adapter backed by `rusqlite`.
//!
//! The `rusqlite::Connection` lives behind a shared mutex so statements can
//! outlive the borrow of the connection that created them. Statements go
//! through rusqlite's prepared-statement cache on every execution, and
//! cursors are materialized before the lock is released so callbacks may
//! issue nested queries on the same connection.

use std::sync::Arc;
use std::vec::IntoIter;

use parking_lot::Mutex;
use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection as RawConnection};
use tracing::debug;

use super::{Driver, NativeConnection, NativeCursor, NativeStatement};
use crate::config::ConnectOptions;
use crate::error::{DriverError, DriverResult};
use crate::types::Value;

const PRAGMA_PREFIX: &str = "pragma.";
const BATCH_SAVEPOINT: &str = "sqlhelper_batch";

/// Driver for SQLite databases. The URL is a file path, optionally prefixed
/// with `sqlite:`, or `:memory:` for a private in-memory database.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDriver;

impl Driver for SqliteDriver {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn connect(&self, options: &ConnectOptions) -> DriverResult<Box<dyn NativeConnection>> {
        let conn = open_database(options.url())?;

        if let Some(timeout) = options.timeout() {
            conn.busy_timeout(timeout)?;
        }
        for (key, value) in options.properties() {
            if let Some(pragma) = key.strip_prefix(PRAGMA_PREFIX) {
                conn.pragma_update(None, pragma, value.as_str())?;
            }
        }

        Ok(Box::new(SqliteConnection {
            inner: Arc::new(Mutex::new(SqliteInner::Connected {
                conn,
                auto_commit: true,
            })),
        }))
    }
}

fn open_database(url: &str) -> DriverResult<RawConnection> {
    let path = url.strip_prefix("sqlite:").unwrap_or(url);
    let path = path.strip_prefix("//").unwrap_or(path);
    match path {
        "" | ":memory:" => Ok(RawConnection::open_in_memory()?),
        path => Ok(RawConnection::open(path)?),
    }
}

#[derive(Debug)]
enum SqliteInner {
    Connected {
        conn: RawConnection,
        auto_commit: bool,
    },
    Disconnected,
}

type SharedSqlite = Arc<Mutex<SqliteInner>>;

fn closed() -> DriverError {
    DriverError::new("connection is closed")
}

/// Run `f` against the raw connection.
fn with_raw<T>(
    shared: &SharedSqlite,
    f: impl FnOnce(&RawConnection) -> rusqlite::Result<T>,
) -> DriverResult<T> {
    let guard = shared.lock();
    match &*guard {
        SqliteInner::Connected { conn, .. } => Ok(f(conn)?),
        SqliteInner::Disconnected => Err(closed()),
    }
}

/// Run `f` inside the current session. With auto-commit off, a transaction
/// is opened first if none is active.
fn in_session<T>(
    shared: &SharedSqlite,
    f: impl FnOnce(&RawConnection) -> rusqlite::Result<T>,
) -> DriverResult<T> {
    let guard = shared.lock();
    match &*guard {
        SqliteInner::Connected { conn, auto_commit } => {
            if !*auto_commit && conn.is_autocommit() {
                conn.execute_batch("BEGIN")?;
            }
            Ok(f(conn)?)
        }
        SqliteInner::Disconnected => Err(closed()),
    }
}

fn total_changes(conn: &RawConnection) -> rusqlite::Result<u64> {
    conn.query_row("SELECT total_changes()", [], |row| row.get::<_, i64>(0))
        .map(|n| n.max(0) as u64)
}

/// Execute one statement to completion and report the rows it changed.
/// DDL reports 0.
fn run_update(conn: &RawConnection, sql: &str, params: &[Value]) -> rusqlite::Result<u64> {
    let before = total_changes(conn)?;
    let mut stmt = conn.prepare_cached(sql)?;
    let mut rows = stmt.query(params_from_iter(params.iter()))?;
    while rows.next()?.is_some() {}
    drop(rows);
    Ok(total_changes(conn)?.saturating_sub(before))
}

/// Run `f` under a savepoint, releasing on success and rolling back on error.
fn under_savepoint<T>(
    conn: &RawConnection,
    f: impl FnOnce() -> rusqlite::Result<T>,
) -> rusqlite::Result<T> {
    conn.execute_batch(&format!("SAVEPOINT {BATCH_SAVEPOINT}"))?;
    match f() {
        Ok(value) => {
            conn.execute_batch(&format!("RELEASE {BATCH_SAVEPOINT}"))?;
            Ok(value)
        }
        Err(e) => {
            let _ = conn.execute_batch(&format!(
                "ROLLBACK TO {BATCH_SAVEPOINT}; RELEASE {BATCH_SAVEPOINT}"
            ));
            Err(e)
        }
    }
}

#[derive(Debug)]
struct SqliteConnection {
    inner: SharedSqlite,
}

impl NativeConnection for SqliteConnection {
    fn prepare(&mut self, sql: &str) -> DriverResult<Box<dyn NativeStatement>> {
        let parameter_count =
            with_raw(&self.inner, |conn| Ok(conn.prepare_cached(sql)?.parameter_count()))?;
        Ok(Box::new(SqliteStatement {
            shared: Arc::clone(&self.inner),
            sql: sql.to_string(),
            parameter_count,
            closed: false,
        }))
    }

    fn execute_batch(&mut self, statements: &[String]) -> DriverResult<Vec<u64>> {
        in_session(&self.inner, |conn| {
            under_savepoint(conn, || {
                statements
                    .iter()
                    .map(|sql| run_update(conn, sql, &[]))
                    .collect()
            })
        })
    }

    fn set_auto_commit(&mut self, enabled: bool) -> DriverResult<()> {
        let mut guard = self.inner.lock();
        match &mut *guard {
            SqliteInner::Connected { conn, auto_commit } => {
                if enabled && !conn.is_autocommit() {
                    conn.execute_batch("COMMIT")?;
                }
                *auto_commit = enabled;
                Ok(())
            }
            SqliteInner::Disconnected => Err(closed()),
        }
    }

    fn auto_commit(&self) -> DriverResult<bool> {
        match &*self.inner.lock() {
            SqliteInner::Connected { auto_commit, .. } => Ok(*auto_commit),
            SqliteInner::Disconnected => Err(closed()),
        }
    }

    fn commit(&mut self) -> DriverResult<()> {
        with_raw(&self.inner, |conn| {
            if !conn.is_autocommit() {
                conn.execute_batch("COMMIT")?;
            }
            Ok(())
        })
    }

    fn rollback(&mut self) -> DriverResult<()> {
        with_raw(&self.inner, |conn| {
            if !conn.is_autocommit() {
                conn.execute_batch("ROLLBACK")?;
            }
            Ok(())
        })
    }

    fn close(&mut self) -> DriverResult<()> {
        let previous = std::mem::replace(&mut *self.inner.lock(), SqliteInner::Disconnected);
        match previous {
            SqliteInner::Connected { conn, .. } => {
                debug!("closing sqlite connection");
                conn.close().map_err(|(_, e)| DriverError::from(e))
            }
            SqliteInner::Disconnected => Ok(()),
        }
    }

    fn is_closed(&self) -> bool {
        matches!(*self.inner.lock(), SqliteInner::Disconnected)
    }
}

#[derive(Debug)]
struct SqliteStatement {
    shared: SharedSqlite,
    sql: String,
    parameter_count: usize,
    closed: bool,
}

impl SqliteStatement {
    fn ensure_open(&self) -> DriverResult<()> {
        if self.closed {
            Err(DriverError::new("statement is closed"))
        } else {
            Ok(())
        }
    }
}

impl NativeStatement for SqliteStatement {
    fn parameter_count(&self) -> usize {
        self.parameter_count
    }

    // SQLite has no prefetch; rows are stepped one at a time.
    fn set_fetch_size(&mut self, _fetch_size: Option<u32>) -> DriverResult<()> {
        self.ensure_open()
    }

    fn query(&mut self, params: &[Value]) -> DriverResult<Box<dyn NativeCursor>> {
        self.ensure_open()?;
        let (columns, rows) = in_session(&self.shared, |conn| {
            let mut stmt = conn.prepare_cached(&self.sql)?;
            let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
            let width = columns.len();
            let mut rows = stmt.query(params_from_iter(params.iter()))?;
            let mut materialized = Vec::new();
            while let Some(row) = rows.next()? {
                let values = (0..width)
                    .map(|i| row.get_ref(i).map(value_from_ref))
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                materialized.push(values);
            }
            Ok((columns, materialized))
        })?;
        Ok(Box::new(SqliteCursor {
            columns,
            rows: rows.into_iter(),
            closed: false,
        }))
    }

    fn update(&mut self, params: &[Value]) -> DriverResult<u64> {
        self.ensure_open()?;
        in_session(&self.shared, |conn| run_update(conn, &self.sql, params))
    }

    fn execute_batch(&mut self, batch: &[Vec<Value>]) -> DriverResult<Vec<u64>> {
        self.ensure_open()?;
        in_session(&self.shared, |conn| {
            under_savepoint(conn, || {
                batch
                    .iter()
                    .map(|params| run_update(conn, &self.sql, params))
                    .collect()
            })
        })
    }

    fn close(&mut self) -> DriverResult<()> {
        self.closed = true;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed || matches!(*self.shared.lock(), SqliteInner::Disconnected)
    }
}

#[derive(Debug)]
struct SqliteCursor {
    columns: Vec<String>,
    rows: IntoIter<Vec<Value>>,
    closed: bool,
}

impl NativeCursor for SqliteCursor {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_row(&mut self) -> DriverResult<Option<Vec<Value>>> {
        if self.closed {
            return Ok(None);
        }
        Ok(self.rows.next())
    }

    fn close(&mut self) -> DriverResult<()> {
        self.closed = true;
        self.rows = Vec::new().into_iter();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

fn value_from_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Int(v),
        ValueRef::Real(v) => Value::Double(v),
        ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Bytes(bytes.to_vec()),
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Owned(SqlValue::Null),
            Self::Bool(v) => ToSqlOutput::Owned(SqlValue::Integer(i64::from(*v))),
            Self::Int(v) => ToSqlOutput::Owned(SqlValue::Integer(*v)),
            Self::Double(v) => ToSqlOutput::Owned(SqlValue::Real(*v)),
            Self::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            Self::Bytes(v) => ToSqlOutput::Borrowed(ValueRef::Blob(v)),
            temporal @ (Self::Date(_) | Self::Time(_) | Self::Timestamp(_)) => {
                ToSqlOutput::Owned(SqlValue::Text(temporal.to_string()))
            }
        })
    }
}

impl From<rusqlite::Error> for DriverError {
    fn from(err: rusqlite::Error) -> Self {
        let code = match &err {
            rusqlite::Error::SqliteFailure(failure, _) => Some(failure.extended_code),
            _ => None,
        };
        let driver = Self::new(err.to_string());
        let driver = match code {
            Some(code) => driver.with_code(code),
            None => driver,
        };
        driver.with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect() -> Box<dyn NativeConnection> {
        let options = ConnectOptions::new("sqlite", ":memory:");
        SqliteDriver.connect(&options).unwrap()
    }

    fn drain(cursor: &mut dyn NativeCursor) -> Vec<Vec<Value>> {
        let mut rows = Vec::new();
        while let Some(row) = cursor.next_row().unwrap() {
            rows.push(row);
        }
        rows
    }

    #[test]
    fn test_query_materializes_rows() {
        let mut conn = connect();
        let mut stmt = conn.prepare("select 1 as one, 'two' as two").unwrap();
        assert_eq!(stmt.parameter_count(), 0);
        let mut cursor = stmt.query(&[]).unwrap();
        assert_eq!(cursor.columns(), ["one", "two"]);
        assert_eq!(drain(cursor.as_mut()), vec![vec![Value::Int(1), Value::from("two")]]);
        assert!(cursor.next_row().unwrap().is_none());
    }

    #[test]
    fn test_update_counts_and_ddl_reports_zero() {
        let mut conn = connect();
        let mut ddl = conn.prepare("create table t (a int, b text)").unwrap();
        assert_eq!(ddl.update(&[]).unwrap(), 0);

        let mut insert = conn.prepare("insert into t values (?, ?)").unwrap();
        assert_eq!(insert.parameter_count(), 2);
        assert_eq!(insert.update(&[Value::Int(1), Value::from("x")]).unwrap(), 1);
        assert_eq!(insert.update(&[Value::Int(2), Value::Null]).unwrap(), 1);

        let mut delete = conn.prepare("delete from t").unwrap();
        assert_eq!(delete.update(&[]).unwrap(), 2);
    }

    #[test]
    fn test_failed_batch_applies_nothing() {
        let mut conn = connect();
        conn.execute_batch(&["create table t (a int primary key)".to_string()])
            .unwrap();
        let mut insert = conn.prepare("insert into t values (?)").unwrap();
        let err = insert
            .execute_batch(&[vec![Value::Int(1)], vec![Value::Int(1)]])
            .unwrap_err();
        assert!(err.code().is_some());

        let mut count = conn.prepare("select count(*) from t").unwrap();
        let mut cursor = count.query(&[]).unwrap();
        assert_eq!(drain(cursor.as_mut()), vec![vec![Value::Int(0)]]);
    }

    #[test]
    fn test_manual_commit_and_rollback() {
        let mut conn = connect();
        conn.execute_batch(&["create table t (a int)".to_string()]).unwrap();
        conn.set_auto_commit(false).unwrap();
        assert!(!conn.auto_commit().unwrap());

        let mut insert = conn.prepare("insert into t values (?)").unwrap();
        insert.update(&[Value::Int(1)]).unwrap();
        conn.rollback().unwrap();
        insert.update(&[Value::Int(2)]).unwrap();
        conn.commit().unwrap();
        conn.set_auto_commit(true).unwrap();

        let mut select = conn.prepare("select a from t").unwrap();
        let mut cursor = select.query(&[]).unwrap();
        assert_eq!(drain(cursor.as_mut()), vec![vec![Value::Int(2)]]);
    }

    #[test]
    fn test_prepare_error_carries_code() {
        let mut conn = connect();
        let err = conn.prepare("xxx").unwrap_err();
        assert!(err.message().contains("syntax error"));
        assert!(err.code().is_some());
    }

    #[test]
    fn test_close_disconnects_statements() {
        let mut conn = connect();
        let mut stmt = conn.prepare("select 1").unwrap();
        conn.close().unwrap();
        assert!(conn.is_closed());
        assert!(stmt.is_closed());
        assert!(stmt.query(&[]).is_err());
        conn.close().unwrap();
    }

    #[test]
    fn test_temporal_values_bind_as_text() {
        let mut conn = connect();
        let ts = chrono::NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        let mut stmt = conn.prepare("select ?").unwrap();
        let mut cursor = stmt.query(&[Value::Timestamp(ts)]).unwrap();
        assert_eq!(
            drain(cursor.as_mut()),
            vec![vec![Value::from("2024-01-02 03:04:05")]]
        );
    }
}
