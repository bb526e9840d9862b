//! Statement pool with nesting-depth accounting.
//!
//! The pool tracks every open prepared/callable statement of one connection
//! in creation order, and counts how many row-producing executions are
//! currently active on the call stack. Both counters are released through
//! RAII guards so every exit path, including `?` and panics, restores them.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::statement::SharedStatement;

/// Identifier of a pooled statement, unique within its connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct StatementId(u64);

impl StatementId {
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StatementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stmt#{}", self.0)
    }
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub open_statements: usize,
    pub depth: usize,
    pub max_depth: usize,
    pub transient: usize,
}

#[derive(Debug)]
struct PoolInner {
    statements: IndexMap<StatementId, SharedStatement>,
    depth: usize,
    max_depth: usize,
    transient: usize,
    next_id: u64,
    shut_down: bool,
}

/// Open statements of one connection plus its nesting counter.
#[derive(Debug, Clone)]
pub struct StatementPool {
    inner: Arc<Mutex<PoolInner>>,
}

impl StatementPool {
    #[must_use]
    pub fn new(max_depth: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PoolInner {
                statements: IndexMap::new(),
                depth: 0,
                max_depth,
                transient: 0,
                next_id: 1,
                shut_down: false,
            })),
        }
    }

    /// Allocate the next statement id.
    pub fn next_id(&self) -> StatementId {
        let mut inner = self.inner.lock();
        let id = StatementId(inner.next_id);
        inner.next_id += 1;
        id
    }

    /// Add an open statement at the end of the pool.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConnectionClosed` once the pool has been shut down.
    pub fn register(&self, id: StatementId, statement: SharedStatement) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.shut_down {
            return Err(Error::ConnectionClosed);
        }
        inner.statements.insert(id, statement);
        debug!(statement_id = %id, open = inner.statements.len(), "statement registered");
        Ok(())
    }

    /// Remove a statement. Removing an unknown id is a no-op.
    pub fn unregister(&self, id: StatementId) -> bool {
        let removed = self.inner.lock().statements.shift_remove(&id).is_some();
        if removed {
            debug!(statement_id = %id, "statement unregistered");
        }
        removed
    }

    /// Enter one level of row-producing execution.
    ///
    /// # Errors
    ///
    /// Returns `Error::NestingLimit` when the new depth would exceed the
    /// maximum. The depth is left unchanged in that case.
    pub fn enter_nesting(&self) -> Result<NestingGuard> {
        let mut inner = self.inner.lock();
        if inner.depth >= inner.max_depth {
            warn!(
                depth = inner.depth,
                max_depth = inner.max_depth,
                "statement nesting limit reached"
            );
            return Err(Error::NestingLimit {
                max: inner.max_depth,
            });
        }
        inner.depth += 1;
        Ok(NestingGuard { pool: self.clone() })
    }

    /// Lease a slot for one ad hoc statement.
    pub fn lease_transient(&self) -> TransientLease {
        self.inner.lock().transient += 1;
        TransientLease { pool: self.clone() }
    }

    pub fn depth(&self) -> usize {
        self.inner.lock().depth
    }

    pub fn max_depth(&self) -> usize {
        self.inner.lock().max_depth
    }

    pub fn len(&self) -> usize {
        self.inner.lock().statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().statements.is_empty()
    }

    pub fn contains(&self, id: StatementId) -> bool {
        self.inner.lock().statements.contains_key(&id)
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.lock().shut_down
    }

    pub fn stats(&self) -> PoolStats {
        let inner = self.inner.lock();
        PoolStats {
            open_statements: inner.statements.len(),
            depth: inner.depth,
            max_depth: inner.max_depth,
            transient: inner.transient,
        }
    }

    /// Registered statements in insertion order.
    pub(crate) fn statements(&self) -> Vec<(StatementId, SharedStatement)> {
        self.inner
            .lock()
            .statements
            .iter()
            .map(|(id, stmt)| (*id, Arc::clone(stmt)))
            .collect()
    }

    /// Drop statements whose native handle was closed behind the pool's back.
    pub(crate) fn prune_closed(&self) {
        self.inner
            .lock()
            .statements
            .retain(|_, stmt| !stmt.lock().is_closed());
    }

    /// Close every registered statement in insertion order and refuse
    /// further registrations.
    pub fn shutdown(&self) {
        let drained: Vec<(StatementId, SharedStatement)> = {
            let mut inner = self.inner.lock();
            inner.shut_down = true;
            inner.statements.drain(..).collect()
        };
        for (id, statement) in drained {
            if let Err(e) = statement.lock().close_native() {
                warn!(statement_id = %id, error = %e, "failed to close statement during shutdown");
            }
        }
    }
}

/// One level of nesting. Dropping the guard leaves the level.
#[derive(Debug)]
#[must_use = "the nesting level is released as soon as the guard is dropped"]
pub struct NestingGuard {
    pool: StatementPool,
}

impl Drop for NestingGuard {
    fn drop(&mut self) {
        let mut inner = self.pool.inner.lock();
        inner.depth = inner.depth.saturating_sub(1);
    }
}

/// Slot held by an ad hoc statement for the duration of one call.
#[derive(Debug)]
#[must_use = "the lease is released as soon as it is dropped"]
pub struct TransientLease {
    pool: StatementPool,
}

impl Drop for TransientLease {
    fn drop(&mut self) {
        let mut inner = self.pool.inner.lock();
        inner.transient = inner.transient.saturating_sub(1);
    }
}
