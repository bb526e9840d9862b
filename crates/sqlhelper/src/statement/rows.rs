//! Lazy row enumeration.

use std::iter::FusedIterator;
use std::sync::Arc;

use tracing::warn;

use crate::driver::{NativeCursor, NativeStatement};
use crate::error::{Error, Result};
use crate::pool::{NestingGuard, TransientLease};
use crate::row::{ColumnIndex, Row};

/// Single-pass sequence of rows backed by an open native cursor.
///
/// The cursor, its nesting level and (for ad hoc queries) the anonymous
/// statement are released exactly once: when the last row has been read,
/// when a fetch fails, on [`Rows::close`], or on drop.
#[derive(Debug)]
pub struct Rows {
    columns: Arc<ColumnIndex>,
    cursor: Option<Box<dyn NativeCursor>>,
    statement: Option<(Box<dyn NativeStatement>, TransientLease)>,
    nesting: Option<NestingGuard>,
}

impl Rows {
    pub(crate) fn new(cursor: Box<dyn NativeCursor>, nesting: NestingGuard) -> Self {
        Self {
            columns: Arc::new(ColumnIndex::new(cursor.columns().iter().cloned())),
            cursor: Some(cursor),
            statement: None,
            nesting: Some(nesting),
        }
    }

    /// Attach the ad hoc statement that produced the cursor so it is closed
    /// together with it.
    pub(crate) fn with_statement(
        mut self,
        statement: Box<dyn NativeStatement>,
        lease: TransientLease,
    ) -> Self {
        self.statement = Some((statement, lease));
        self
    }

    pub fn columns(&self) -> &Arc<ColumnIndex> {
        &self.columns
    }

    /// True once the cursor has been released.
    pub const fn is_closed(&self) -> bool {
        self.cursor.is_none()
    }

    /// Release the cursor without reading the remaining rows. Idempotent.
    ///
    /// # Errors
    ///
    /// The first error reported while closing native resources. Every
    /// resource is released regardless.
    pub fn close(&mut self) -> Result<()> {
        self.release()
    }

    /// Feed every remaining row to `f`, returning how many were seen.
    ///
    /// # Errors
    ///
    /// `Error::CursorClosed` when the rows were already closed or read to
    /// the end. Otherwise fetch errors or the first error returned by `f`;
    /// the cursor is released before the error is returned.
    pub fn drain_into<F>(mut self, mut f: F) -> Result<usize>
    where
        F: FnMut(Row) -> Result<()>,
    {
        if self.is_closed() {
            return Err(Error::CursorClosed);
        }
        let mut count = 0;
        while let Some(row) = self.next() {
            f(row?)?;
            count += 1;
        }
        Ok(count)
    }

    fn release(&mut self) -> Result<()> {
        let mut first_error = None;
        if let Some(mut cursor) = self.cursor.take()
            && let Err(e) = cursor.close()
        {
            first_error.get_or_insert(e);
        }
        if let Some((mut statement, lease)) = self.statement.take() {
            if let Err(e) = statement.close() {
                first_error.get_or_insert(e);
            }
            drop(lease);
        }
        self.nesting = None;
        first_error.map_or(Ok(()), |e| Err(e.into()))
    }
}

impl Iterator for Rows {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        let cursor = self.cursor.as_mut()?;
        match cursor.next_row() {
            Ok(Some(values)) => Some(Ok(Row::new(Arc::clone(&self.columns), values))),
            Ok(None) => self.release().err().map(Err),
            Err(e) => {
                if let Err(close_err) = self.release() {
                    warn!(error = %close_err, "failed to release cursor after fetch error");
                }
                Some(Err(e.into()))
            }
        }
    }
}

impl FusedIterator for Rows {}

impl Drop for Rows {
    fn drop(&mut self) {
        if (self.cursor.is_some() || self.statement.is_some())
            && let Err(e) = self.release()
        {
            warn!(error = %e, "failed to release cursor");
        }
    }
}
