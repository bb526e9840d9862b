//! Pooled prepared statements.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::rows::Rows;
use super::state::{SharedStatement, StatementCore, StatementKind};
use crate::connection::{ExecutionKind, Shared};
use crate::driver::NativeStatement;
use crate::error::{DriverResult, Error, Result};
use crate::pool::StatementId;
use crate::row::Row;
use crate::types::Value;

/// A reusable parameterized statement registered in its connection's pool.
///
/// Open until [`close`](Self::close) or until the connection closes.
/// Dropping the handle does not close it.
#[derive(Debug)]
pub struct PreparedStatement {
    id: StatementId,
    core: SharedStatement,
    shared: Arc<Shared>,
}

impl PreparedStatement {
    pub(crate) fn register(
        shared: &Arc<Shared>,
        native: Box<dyn NativeStatement>,
        sql: &str,
        kind: StatementKind,
    ) -> Result<Self> {
        let mut core = StatementCore::new(native, sql, kind);
        if let Err(e) = core.apply_fetch_size(shared.fetch_size()) {
            discard(&mut core, sql);
            return Err(e);
        }

        let core = Arc::new(Mutex::new(core));
        let id = shared.pool.next_id();
        if let Err(e) = shared.pool.register(id, Arc::clone(&core)) {
            discard(&mut core.lock(), sql);
            return Err(e);
        }
        debug!(statement_id = %id, ?kind, sql, "statement prepared");

        Ok(Self {
            id,
            core,
            shared: Arc::clone(shared),
        })
    }

    pub const fn id(&self) -> StatementId {
        self.id
    }

    pub fn sql(&self) -> String {
        self.core.lock().sql().to_string()
    }

    /// Number of bind placeholders detected at prepare time.
    pub fn parameter_count(&self) -> usize {
        self.core.lock().parameter_count()
    }

    pub fn is_closed(&self) -> bool {
        self.core.lock().is_closed()
    }

    /// The statement's own fetch size, else the connection's current one.
    pub fn fetch_size(&self) -> Option<u32> {
        let own = self.core.lock().fetch_size;
        own.or_else(|| self.shared.fetch_size())
    }

    /// Override the fetch size for this statement. `None` falls back to the
    /// connection default again.
    ///
    /// # Errors
    ///
    /// `Error::StatementClosed`, or the driver's error.
    pub fn set_fetch_size(&self, fetch_size: impl Into<Option<u32>>) -> Result<()> {
        let fetch_size = fetch_size.into();
        let fallback = self.shared.fetch_size();
        let mut core = self.core.lock();
        core.native_mut()?;
        core.fetch_size = fetch_size;
        core.apply_fetch_size(fallback)
    }

    /// Execute and collect every row.
    ///
    /// # Errors
    ///
    /// Closed statement, nesting limit or driver errors.
    pub fn query(&self) -> Result<Vec<Row>> {
        self.query_with(&[])
    }

    /// # Errors
    ///
    /// Closed statement, nesting limit or driver errors.
    pub fn query_with(&self, params: &[Value]) -> Result<Vec<Row>> {
        self.enumerate_with(params)?.collect()
    }

    /// Stream every row into `f`, returning the row count.
    ///
    /// # Errors
    ///
    /// Closed statement, nesting limit, driver errors or the first error
    /// returned by `f`.
    pub fn query_each<F>(&self, f: F) -> Result<usize>
    where
        F: FnMut(Row) -> Result<()>,
    {
        self.query_each_with(&[], f)
    }

    /// # Errors
    ///
    /// Closed statement, nesting limit, driver errors or the first error
    /// returned by `f`.
    pub fn query_each_with<F>(&self, params: &[Value], f: F) -> Result<usize>
    where
        F: FnMut(Row) -> Result<()>,
    {
        self.enumerate_with(params)?.drain_into(f)
    }

    /// Execute and return a lazy row sequence.
    ///
    /// # Errors
    ///
    /// Closed statement, nesting limit or driver errors.
    pub fn enumerate(&self) -> Result<Rows> {
        self.enumerate_with(&[])
    }

    /// # Errors
    ///
    /// Closed statement, nesting limit or driver errors.
    pub fn enumerate_with(&self, params: &[Value]) -> Result<Rows> {
        self.ensure_open()?;
        let nesting = self.shared.pool.enter_nesting()?;
        let fallback = self.shared.fetch_size();
        let started = Instant::now();

        let depth = self.shared.pool.depth();
        let (sql, opened) = {
            let mut core = self.core.lock();
            debug!(statement_id = %self.id, depth, "prepared query");
            let opened = core
                .apply_fetch_size(fallback)
                .and_then(|()| Ok(core.native_mut()?.query(params)?));
            (core.sql().to_string(), opened)
        };

        let cursor = self
            .shared
            .observe(ExecutionKind::Query, &sql, started, opened, |_| 1)?;
        Ok(Rows::new(cursor, nesting))
    }

    /// Execute as a mutation and return the affected-row count.
    ///
    /// # Errors
    ///
    /// Closed statement or driver errors.
    pub fn update(&self, params: &[Value]) -> Result<u64> {
        let started = Instant::now();
        let mut core = self.core.lock();
        let result = core
            .native_mut()
            .and_then(|native| Ok(native.update(params)?));
        if matches!(result, Err(Error::StatementClosed)) {
            return result;
        }
        debug!(statement_id = %self.id, "prepared update");
        self.shared
            .observe(ExecutionKind::Update, core.sql(), started, result, |n| *n)
    }

    /// Buffer one parameter set. Nothing is executed.
    ///
    /// # Errors
    ///
    /// `Error::StatementClosed`.
    pub fn add_batch(&self, params: &[Value]) -> Result<()> {
        let mut core = self.core.lock();
        core.native_mut()?;
        core.batch.push(params.to_vec());
        Ok(())
    }

    /// Execute every buffered parameter set in one round trip and clear the
    /// buffer. An empty buffer is a no-op returning 0.
    ///
    /// # Errors
    ///
    /// `Error::StatementClosed` or the driver's error.
    pub fn execute_batch(&self) -> Result<u64> {
        let started = Instant::now();
        let mut core = self.core.lock();
        core.native_mut()?;
        if core.batch.is_empty() {
            return Ok(0);
        }
        debug!(statement_id = %self.id, pending = core.batch.len(), "executing statement batch");
        let result = core.execute_pending_batch();
        self.shared
            .observe(ExecutionKind::Batch, core.sql(), started, result, |n| *n)
    }

    /// Discard buffered parameter sets. Idempotent.
    ///
    /// # Errors
    ///
    /// `Error::StatementClosed`.
    pub fn clear_batch(&self) -> Result<()> {
        let mut core = self.core.lock();
        core.native_mut()?;
        core.batch.clear();
        Ok(())
    }

    /// Number of buffered parameter sets.
    pub fn batch_len(&self) -> usize {
        self.core.lock().batch.len()
    }

    /// Close the native statement and remove it from the pool. Closing a
    /// closed statement is a no-op.
    ///
    /// # Errors
    ///
    /// The driver's close error. The statement counts as closed regardless.
    pub fn close(&self) -> Result<()> {
        let result = self.core.lock().close_native();
        if self.shared.pool.unregister(self.id) {
            debug!(statement_id = %self.id, "statement closed");
        }
        if let Err(e) = &result {
            warn!(statement_id = %self.id, error = %e, "error while closing statement");
        }
        result
    }

    /// Direct access to the native statement.
    ///
    /// # Errors
    ///
    /// `Error::StatementClosed`, or the error returned by `f`.
    pub fn with_native<T>(
        &self,
        f: impl FnOnce(&mut dyn NativeStatement) -> DriverResult<T>,
    ) -> Result<T> {
        let mut core = self.core.lock();
        Ok(f(core.native_mut()?)?)
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        self.core.lock().native_mut().map(|_| ())
    }

    pub(crate) fn core(&self) -> &SharedStatement {
        &self.core
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }
}

/// Close a statement that never made it into the pool.
fn discard(core: &mut StatementCore, sql: &str) {
    if let Err(e) = core.close_native() {
        warn!(sql, error = %e, "failed to close statement after prepare error");
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use crate::config::ConnectOptions;
    use crate::connection::Connection;
    use crate::params;

    fn memory() -> Connection {
        let conn = Connection::open(ConnectOptions::new("sqlite", ":memory:")).unwrap();
        conn.update("create table t (a int primary key, b varchar(100))")
            .unwrap();
        conn
    }

    #[test]
    fn test_fetch_size_falls_back_dynamically() {
        let conn = memory();
        let stmt = conn.prepare("select a from t").unwrap();
        assert_eq!(stmt.fetch_size(), None);
        conn.set_fetch_size(100).unwrap();
        assert_eq!(stmt.fetch_size(), Some(100));
        stmt.set_fetch_size(10).unwrap();
        assert_eq!(stmt.fetch_size(), Some(10));
        stmt.set_fetch_size(None).unwrap();
        assert_eq!(stmt.fetch_size(), Some(100));
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let conn = memory();
        let ins = conn.prepare("insert into t values (?, ?)").unwrap();
        assert_eq!(ins.execute_batch().unwrap(), 0);
        ins.clear_batch().unwrap();
        ins.clear_batch().unwrap();
    }

    #[test]
    fn test_native_close_marks_closed() {
        let conn = memory();
        let stmt = conn.prepare("select a from t").unwrap();
        stmt.with_native(|n| n.close()).unwrap();
        assert!(stmt.is_closed());
        assert!(stmt.query().unwrap_err().is_closed());
        assert!(conn.prepared_statements().is_empty());
    }

    #[test]
    fn test_update_records_affected_rows() {
        let conn = memory();
        let ins = conn.prepare("insert into t values (?, ?)").unwrap();
        assert_eq!(ins.update(&params![1, "A"]).unwrap(), 1);
        assert_eq!(conn.prev_stat().unwrap().success_count, 1);
        assert!(ins.update(&params![1, "A"]).unwrap_err().is_driver());
        assert_eq!(conn.prev_stat().unwrap().failure_count, 1);
    }
}
