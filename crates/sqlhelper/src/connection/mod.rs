//! Connection orchestration.
//!
//! A [`Connection`] owns one native connection and the [`StatementPool`] of
//! statements prepared on it. Ad hoc calls (`query`, `update`, ...) prepare
//! an anonymous statement that lives only for the duration of the call.

mod statistics;
mod transaction;

pub use statistics::{AccumulatedStat, ExecutionKind, ExecutionStat};
pub use transaction::{Transaction, TxOutcome};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ConnectOptions;
use crate::driver::{Driver, DriverRegistry, NativeConnection, NativeStatement};
use crate::error::{DriverResult, Error, Result};
use crate::pool::{PoolStats, StatementId, StatementPool};
use crate::row::Row;
use crate::statement::{CallableStatement, PreparedStatement, Rows, StatementKind};
use crate::types::Value;
use statistics::Statistics;

#[derive(Debug)]
enum NativeHandle {
    Connected(Box<dyn NativeConnection>),
    Disconnected,
}

#[derive(Debug, Default)]
struct Session {
    fetch_size: Option<u32>,
    batch: Vec<String>,
    stats: Statistics,
    in_transaction: bool,
}

/// State shared by a connection and every statement it created.
#[derive(Debug)]
pub(crate) struct Shared {
    native: Mutex<NativeHandle>,
    pub(crate) pool: StatementPool,
    session: Mutex<Session>,
}

impl Shared {
    fn new(native: Box<dyn NativeConnection>, max_depth: usize) -> Self {
        Self {
            native: Mutex::new(NativeHandle::Connected(native)),
            pool: StatementPool::new(max_depth),
            session: Mutex::new(Session::default()),
        }
    }

    /// Run `f` on the native connection.
    pub(crate) fn with_native<T>(
        &self,
        f: impl FnOnce(&mut dyn NativeConnection) -> DriverResult<T>,
    ) -> Result<T> {
        match &mut *self.native.lock() {
            NativeHandle::Connected(conn) if !conn.is_closed() => Ok(f(conn.as_mut())?),
            _ => Err(Error::ConnectionClosed),
        }
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        self.with_native(|_| Ok(()))
    }

    pub(crate) fn fetch_size(&self) -> Option<u32> {
        self.session.lock().fetch_size
    }

    /// Record the outcome of one execution and pass it through.
    pub(crate) fn observe<T>(
        &self,
        kind: ExecutionKind,
        sql: &str,
        started: Instant,
        result: Result<T>,
        success_count: impl FnOnce(&T) -> u64,
    ) -> Result<T> {
        let elapsed = started.elapsed();
        let (success_count, failure_count) = match &result {
            Ok(value) => (success_count(value), 0),
            Err(e) => {
                debug!(?kind, sql, error = %e, "execution failed");
                (0, 1)
            }
        };
        self.session.lock().stats.record(ExecutionStat {
            kind,
            sql: sql.to_string(),
            elapsed,
            success_count,
            failure_count,
        });
        result
    }
}

/// Close an ad hoc statement, logging instead of failing.
fn close_quietly(mut statement: Box<dyn NativeStatement>, sql: &str) {
    if let Err(e) = statement.close() {
        warn!(sql, error = %e, "failed to close ad hoc statement");
    }
}

/// Open prepared or callable statement as listed by
/// [`Connection::prepared_statements`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatementInfo {
    pub id: StatementId,
    pub sql: String,
    pub kind: StatementKind,
}

impl PartialEq<PreparedStatement> for StatementInfo {
    fn eq(&self, other: &PreparedStatement) -> bool {
        self.id == other.id()
    }
}

impl PartialEq<CallableStatement> for StatementInfo {
    fn eq(&self, other: &CallableStatement) -> bool {
        self.id == other.id()
    }
}

/// One logical database connection.
#[derive(Debug)]
pub struct Connection {
    shared: Arc<Shared>,
    driver: Arc<dyn Driver>,
    options: ConnectOptions,
}

impl Connection {
    /// Connect through the drivers compiled into this build.
    ///
    /// # Errors
    ///
    /// `Error::DriverNotFound` for an unknown driver, or the driver's
    /// connect error.
    pub fn open(options: ConnectOptions) -> Result<Self> {
        Self::open_with(&DriverRegistry::with_builtin_drivers(), options)
    }

    /// Connect through an explicit driver registry.
    ///
    /// # Errors
    ///
    /// `Error::DriverNotFound` for an unknown driver, or the driver's
    /// connect error.
    pub fn open_with(registry: &DriverRegistry, options: ConnectOptions) -> Result<Self> {
        let driver = registry.resolve(options.driver())?;
        Self::connect(driver, options)
    }

    fn connect(driver: Arc<dyn Driver>, options: ConnectOptions) -> Result<Self> {
        let native = driver.connect(&options)?;
        info!(driver = driver.name(), "connection opened");
        Ok(Self {
            shared: Arc::new(Shared::new(native, options.max_nesting_depth())),
            driver,
            options,
        })
    }

    /// Open a connection, run `f`, then close the connection on every path.
    ///
    /// # Errors
    ///
    /// Connect errors, the error returned by `f`, or a close error if `f`
    /// succeeded.
    pub fn with<T, F>(options: ConnectOptions, f: F) -> Result<T>
    where
        F: FnOnce(&Self) -> Result<T>,
    {
        let conn = Self::open(options)?;
        let result = f(&conn);
        match (result, conn.close()) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(close_err)) => Err(close_err),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(close_err)) => {
                warn!(error = %close_err, "failed to close connection after error");
                Err(e)
            }
        }
    }

    /// A new, independent connection with the same options and the current
    /// fetch size. Works on a closed connection too.
    ///
    /// # Errors
    ///
    /// The driver's connect error.
    pub fn try_clone(&self) -> Result<Self> {
        let clone = Self::connect(Arc::clone(&self.driver), self.options.clone())?;
        clone.shared.session.lock().fetch_size = self.fetch_size();
        Ok(clone)
    }

    /// Identifier of the driver this connection was opened with.
    pub fn driver(&self) -> &str {
        self.options.driver()
    }

    pub fn url(&self) -> &str {
        self.options.url()
    }

    pub const fn options(&self) -> &ConnectOptions {
        &self.options
    }

    pub fn is_closed(&self) -> bool {
        self.shared.ensure_open().is_err()
    }

    /// Close every pooled statement, then the native connection. Idempotent.
    ///
    /// # Errors
    ///
    /// The native close error. The connection counts as closed regardless.
    pub fn close(&self) -> Result<()> {
        let previous = std::mem::replace(&mut *self.shared.native.lock(), NativeHandle::Disconnected);
        let NativeHandle::Connected(mut native) = previous else {
            return Ok(());
        };

        self.shared.pool.shutdown();
        self.shared.session.lock().batch.clear();
        let result = native.close();
        info!(driver = self.driver.name(), "connection closed");
        Ok(result?)
    }

    /// Default fetch size for statements on this connection.
    pub fn fetch_size(&self) -> Option<u32> {
        self.shared.fetch_size()
    }

    /// Set the default fetch size. Statements without an override of their
    /// own pick up the new value on their next execution.
    ///
    /// # Errors
    ///
    /// `Error::ConnectionClosed` on a closed connection.
    pub fn set_fetch_size(&self, fetch_size: impl Into<Option<u32>>) -> Result<()> {
        self.shared.ensure_open()?;
        self.shared.session.lock().fetch_size = fetch_size.into();
        Ok(())
    }

    // Ad hoc execution

    /// Run a query and collect every row.
    ///
    /// # Errors
    ///
    /// Closed connection, nesting limit or driver errors.
    pub fn query(&self, sql: &str) -> Result<Vec<Row>> {
        self.query_with(sql, &[])
    }

    /// Like [`Connection::query`] with bind parameters.
    ///
    /// # Errors
    ///
    /// Closed connection, nesting limit or driver errors.
    pub fn query_with(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.enumerate_with(sql, params)?.collect()
    }

    /// Stream every row into `f` and return the number of rows seen.
    ///
    /// `f` may issue further queries on this connection, up to the
    /// configured nesting depth.
    ///
    /// # Errors
    ///
    /// Closed connection, nesting limit, driver errors or the first error
    /// returned by `f`.
    pub fn query_each<F>(&self, sql: &str, f: F) -> Result<usize>
    where
        F: FnMut(Row) -> Result<()>,
    {
        self.query_each_with(sql, &[], f)
    }

    /// Like [`Connection::query_each`] with bind parameters.
    ///
    /// # Errors
    ///
    /// Closed connection, nesting limit, driver errors or the first error
    /// returned by `f`.
    pub fn query_each_with<F>(&self, sql: &str, params: &[Value], f: F) -> Result<usize>
    where
        F: FnMut(Row) -> Result<()>,
    {
        self.enumerate_with(sql, params)?.drain_into(f)
    }

    /// Run a query and return a lazy row sequence.
    ///
    /// # Errors
    ///
    /// Closed connection, nesting limit or driver errors.
    pub fn enumerate(&self, sql: &str) -> Result<Rows> {
        self.enumerate_with(sql, &[])
    }

    /// Like [`Connection::enumerate`] with bind parameters.
    ///
    /// # Errors
    ///
    /// Closed connection, nesting limit or driver errors.
    pub fn enumerate_with(&self, sql: &str, params: &[Value]) -> Result<Rows> {
        self.shared.ensure_open()?;
        let nesting = self.shared.pool.enter_nesting()?;
        let lease = self.shared.pool.lease_transient();
        let started = Instant::now();
        debug!(sql, depth = self.shared.pool.depth(), "ad hoc query");

        let mut statement = self.shared.with_native(|n| n.prepare(sql))?;
        let configured = match self.fetch_size() {
            Some(n) => statement.set_fetch_size(Some(n)),
            None => Ok(()),
        };
        let opened = configured
            .and_then(|()| statement.query(params))
            .map_err(Error::from);

        match self.shared.observe(ExecutionKind::Query, sql, started, opened, |_| 1) {
            Ok(cursor) => Ok(Rows::new(cursor, nesting).with_statement(statement, lease)),
            Err(e) => {
                close_quietly(statement, sql);
                Err(e)
            }
        }
    }

    /// Execute a mutation and return the affected-row count. DDL reports 0.
    ///
    /// # Errors
    ///
    /// Closed connection or driver errors.
    pub fn update(&self, sql: &str) -> Result<u64> {
        self.update_with(sql, &[])
    }

    /// Like [`Connection::update`] with bind parameters.
    ///
    /// # Errors
    ///
    /// Closed connection or driver errors.
    pub fn update_with(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.shared.ensure_open()?;
        let _lease = self.shared.pool.lease_transient();
        let started = Instant::now();
        debug!(sql, "ad hoc update");

        let mut statement = self.shared.with_native(|n| n.prepare(sql))?;
        let result = statement.update(params).map_err(Error::from);
        close_quietly(statement, sql);
        self.shared
            .observe(ExecutionKind::Update, sql, started, result, |n| *n)
    }

    /// Buffer an unparameterized statement for [`Connection::execute_batch`].
    ///
    /// # Errors
    ///
    /// `Error::ConnectionClosed` on a closed connection.
    pub fn add_batch(&self, sql: impl Into<String>) -> Result<()> {
        self.shared.ensure_open()?;
        self.shared.session.lock().batch.push(sql.into());
        Ok(())
    }

    /// Execute the connection's buffered statements, then every open
    /// prepared statement's pending batch in creation order. Returns the
    /// total affected rows.
    ///
    /// # Errors
    ///
    /// Closed connection or the first driver error. Batches after the
    /// failing one stay pending.
    pub fn execute_batch(&self) -> Result<u64> {
        self.shared.ensure_open()?;
        let mut total = 0;

        let adhoc = std::mem::take(&mut self.shared.session.lock().batch);
        if !adhoc.is_empty() {
            let started = Instant::now();
            debug!(statements = adhoc.len(), "executing ad hoc batch");
            let result = self
                .shared
                .with_native(|n| n.execute_batch(&adhoc))
                .map(|counts| counts.iter().sum::<u64>());
            total += self
                .shared
                .observe(ExecutionKind::Batch, "<batch>", started, result, |n| *n)?;
        }

        for (id, statement) in self.shared.pool.statements() {
            let mut core = statement.lock();
            if core.is_closed() || core.batch.is_empty() {
                continue;
            }
            let started = Instant::now();
            debug!(statement_id = %id, pending = core.batch.len(), "executing statement batch");
            let result = core.execute_pending_batch();
            total += self
                .shared
                .observe(ExecutionKind::Batch, core.sql(), started, result, |n| *n)?;
        }
        Ok(total)
    }

    /// Discard the connection's buffered statements and every prepared
    /// statement's pending batch.
    ///
    /// # Errors
    ///
    /// `Error::ConnectionClosed` on a closed connection.
    pub fn clear_batch(&self) -> Result<()> {
        self.shared.ensure_open()?;
        self.shared.session.lock().batch.clear();
        for (_, statement) in self.shared.pool.statements() {
            statement.lock().batch.clear();
        }
        Ok(())
    }

    // Pooled statements

    /// Prepare and register a statement.
    ///
    /// # Errors
    ///
    /// Closed connection or driver errors.
    pub fn prepare(&self, sql: &str) -> Result<PreparedStatement> {
        let native = self.shared.with_native(|n| n.prepare(sql))?;
        PreparedStatement::register(&self.shared, native, sql, StatementKind::Prepared)
    }

    /// Prepare and register a stored-procedure call.
    ///
    /// # Errors
    ///
    /// Closed connection or driver errors.
    pub fn prepare_call(&self, sql: &str) -> Result<CallableStatement> {
        let native = self.shared.with_native(|n| n.prepare_call(sql))?;
        PreparedStatement::register(&self.shared, native, sql, StatementKind::Callable)
            .map(CallableStatement::new)
    }

    /// Open pooled statements in creation order.
    pub fn prepared_statements(&self) -> Vec<StatementInfo> {
        self.shared.pool.prune_closed();
        self.shared
            .pool
            .statements()
            .into_iter()
            .map(|(id, statement)| {
                let core = statement.lock();
                StatementInfo {
                    id,
                    sql: core.sql().to_string(),
                    kind: core.kind(),
                }
            })
            .collect()
    }

    // Transactions

    /// Run `f` inside a transaction.
    ///
    /// Auto-commit is disabled for the duration of the block. The block
    /// commits implicitly when `f` returns `Ok` without an explicit
    /// [`Transaction::commit`] or [`Transaction::rollback`], and rolls back
    /// when `f` returns `Err` or panics. Auto-commit is restored on every
    /// path.
    ///
    /// # Errors
    ///
    /// `Error::Transaction` when a transaction is already active on this
    /// connection, driver errors from commit/rollback, or the error
    /// returned by `f`.
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        let mut tx = Transaction::begin(self)?;
        let result = f(&mut tx);
        tx.finish(result)
    }

    pub fn in_transaction(&self) -> bool {
        self.shared.session.lock().in_transaction
    }

    // Statistics

    /// The most recent execution through this connection or any of its
    /// statements.
    pub fn prev_stat(&self) -> Option<ExecutionStat> {
        self.shared.session.lock().stats.prev().cloned()
    }

    pub fn accumulated_stats(&self) -> HashMap<ExecutionKind, AccumulatedStat> {
        self.shared.session.lock().stats.accumulated()
    }

    pub fn reset_accumulated_stats(&self) {
        self.shared.session.lock().stats.reset();
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.shared.pool.stats()
    }

    /// Direct access to the native connection.
    ///
    /// # Errors
    ///
    /// `Error::ConnectionClosed`, or the error returned by `f`.
    pub fn with_native<T>(
        &self,
        f: impl FnOnce(&mut dyn NativeConnection) -> DriverResult<T>,
    ) -> Result<T> {
        self.shared.with_native(f)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "failed to close connection on drop");
        }
    }
}
