//! In-memory native doubles for unit tests.

use crate::driver::{NativeCursor, NativeStatement};
use crate::error::DriverResult;
use crate::types::Value;

/// Statement that accepts everything and returns nothing.
#[derive(Debug, Default)]
pub struct NoopStatement {
    closed: bool,
}

impl NativeStatement for NoopStatement {
    fn parameter_count(&self) -> usize {
        0
    }

    fn set_fetch_size(&mut self, _fetch_size: Option<u32>) -> DriverResult<()> {
        Ok(())
    }

    fn query(&mut self, _params: &[Value]) -> DriverResult<Box<dyn NativeCursor>> {
        Ok(Box::new(EmptyCursor::default()))
    }

    fn update(&mut self, _params: &[Value]) -> DriverResult<u64> {
        Ok(0)
    }

    fn execute_batch(&mut self, batch: &[Vec<Value>]) -> DriverResult<Vec<u64>> {
        Ok(vec![0; batch.len()])
    }

    fn close(&mut self) -> DriverResult<()> {
        self.closed = true;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Cursor over an empty result set.
#[derive(Debug, Default)]
pub struct EmptyCursor {
    columns: Vec<String>,
    closed: bool,
}

impl NativeCursor for EmptyCursor {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_row(&mut self) -> DriverResult<Option<Vec<Value>>> {
        Ok(None)
    }

    fn close(&mut self) -> DriverResult<()> {
        self.closed = true;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
