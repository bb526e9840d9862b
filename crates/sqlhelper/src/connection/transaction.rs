//! Block-scoped transactions.

use tracing::{debug, warn};

use super::Connection;
use crate::error::{Error, Result};

/// How a transaction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    Committed,
    RolledBack,
}

/// Handle passed to the closure of [`Connection::transaction`].
///
/// At most one of [`commit`](Self::commit) and [`rollback`](Self::rollback)
/// may be called. Either one ends the transaction immediately and restores
/// auto-commit, so statements issued afterwards in the same block run in
/// auto-commit mode.
#[derive(Debug)]
pub struct Transaction<'conn> {
    conn: &'conn Connection,
    previous_auto_commit: bool,
    outcome: Option<TxOutcome>,
    restored: bool,
}

impl<'conn> Transaction<'conn> {
    pub(super) fn begin(conn: &'conn Connection) -> Result<Self> {
        conn.shared.ensure_open()?;
        if conn.shared.session.lock().in_transaction {
            return Err(Error::transaction(
                "a transaction is already active on this connection",
            ));
        }

        let previous_auto_commit = conn.shared.with_native(|n| n.auto_commit())?;
        conn.shared.with_native(|n| n.set_auto_commit(false))?;
        conn.shared.session.lock().in_transaction = true;
        debug!("transaction started");

        Ok(Self {
            conn,
            previous_auto_commit,
            outcome: None,
            restored: false,
        })
    }

    /// The connection this transaction runs on.
    pub const fn connection(&self) -> &'conn Connection {
        self.conn
    }

    /// Commit everything done in the block so far.
    ///
    /// # Errors
    ///
    /// `Error::Transaction` if the transaction already ended, or the
    /// driver's commit error.
    pub fn commit(&mut self) -> Result<()> {
        self.end(TxOutcome::Committed)
    }

    /// Undo everything done in the block so far.
    ///
    /// # Errors
    ///
    /// `Error::Transaction` if the transaction already ended, or the
    /// driver's rollback error.
    pub fn rollback(&mut self) -> Result<()> {
        self.end(TxOutcome::RolledBack)
    }

    pub const fn outcome(&self) -> Option<TxOutcome> {
        self.outcome
    }

    pub const fn is_active(&self) -> bool {
        self.outcome.is_none()
    }

    fn end(&mut self, outcome: TxOutcome) -> Result<()> {
        if let Some(previous) = self.outcome {
            return Err(Error::transaction(format!(
                "transaction already ended ({previous:?})"
            )));
        }
        self.conn.shared.with_native(|n| match outcome {
            TxOutcome::Committed => n.commit(),
            TxOutcome::RolledBack => n.rollback(),
        })?;
        self.outcome = Some(outcome);
        debug!(?outcome, "transaction ended");
        self.restore_auto_commit()
    }

    fn restore_auto_commit(&mut self) -> Result<()> {
        if self.restored {
            return Ok(());
        }
        self.restored = true;
        let previous = self.previous_auto_commit;
        self.conn.shared.with_native(|n| n.set_auto_commit(previous))
    }

    /// Complete the block: implicit commit on `Ok`, rollback (through
    /// `Drop`) on `Err` or when the commit fails.
    pub(super) fn finish<T>(mut self, result: Result<T>) -> Result<T> {
        let value = result?;
        if self.outcome.is_none() {
            self.commit()?;
        }
        Ok(value)
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.outcome.is_none() {
            match self.conn.shared.with_native(|n| n.rollback()) {
                Ok(()) => {
                    self.outcome = Some(TxOutcome::RolledBack);
                    debug!("transaction rolled back");
                }
                Err(e) => warn!(error = %e, "failed to roll back transaction"),
            }
        }
        if let Err(e) = self.restore_auto_commit() {
            warn!(error = %e, "failed to restore auto-commit");
        }
        self.conn.shared.session.lock().in_transaction = false;
    }
}
