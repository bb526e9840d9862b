//! State shared between a statement handle and the pool.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::driver::NativeStatement;
use crate::error::{Error, Result};
use crate::types::Value;

/// Whether a pooled statement was created by `prepare` or `prepare_call`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StatementKind {
    Prepared,
    Callable,
}

/// Native handle plus the per-statement state kept by this crate.
#[derive(Debug)]
pub struct StatementCore {
    native: Option<Box<dyn NativeStatement>>,
    sql: String,
    kind: StatementKind,
    parameter_count: usize,
    pub(crate) fetch_size: Option<u32>,
    // last value handed to the driver
    applied_fetch_size: Option<u32>,
    pub(crate) batch: Vec<Vec<Value>>,
}

pub type SharedStatement = Arc<Mutex<StatementCore>>;

impl StatementCore {
    pub(crate) fn new(native: Box<dyn NativeStatement>, sql: &str, kind: StatementKind) -> Self {
        let parameter_count = native.parameter_count();
        Self {
            native: Some(native),
            sql: sql.to_string(),
            kind,
            parameter_count,
            fetch_size: None,
            applied_fetch_size: None,
            batch: Vec::new(),
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub const fn kind(&self) -> StatementKind {
        self.kind
    }

    pub const fn parameter_count(&self) -> usize {
        self.parameter_count
    }

    /// True once closed here or by the driver.
    pub fn is_closed(&self) -> bool {
        self.native.as_ref().is_none_or(|n| n.is_closed())
    }

    pub(crate) fn native_mut(&mut self) -> Result<&mut dyn NativeStatement> {
        match self.native.as_mut() {
            Some(native) if !native.is_closed() => Ok(native.as_mut()),
            _ => Err(Error::StatementClosed),
        }
    }

    /// Run the buffered parameter sets in one round trip and return the
    /// total affected rows. The buffer is emptied even if the driver fails.
    pub(crate) fn execute_pending_batch(&mut self) -> Result<u64> {
        self.native_mut()?;
        let batch = std::mem::take(&mut self.batch);
        if batch.is_empty() {
            return Ok(0);
        }
        let counts = self.native_mut()?.execute_batch(&batch)?;
        Ok(counts.iter().sum())
    }

    /// Hand the effective fetch size (the override, else `fallback`) to the
    /// driver. `None` is only sent to undo an earlier explicit size.
    pub(crate) fn apply_fetch_size(&mut self, fallback: Option<u32>) -> Result<()> {
        let effective = self.fetch_size.or(fallback);
        if effective.is_some() || self.applied_fetch_size.is_some() {
            self.native_mut()?.set_fetch_size(effective)?;
            self.applied_fetch_size = effective;
        }
        Ok(())
    }

    /// Close the native handle and drop pending batches. Idempotent.
    pub(crate) fn close_native(&mut self) -> Result<()> {
        self.batch.clear();
        match self.native.take() {
            Some(mut native) if !native.is_closed() => Ok(native.close()?),
            _ => Ok(()),
        }
    }
}
