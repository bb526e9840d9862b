//! Native driver boundary.
//!
//! The connection layer never talks to a database directly. It drives these
//! traits, and adapters (`sqlite`, `hana`) map them onto a concrete client.
//! Every native method reports failures as [`DriverError`], which the
//! connection layer passes through unmodified inside `Error::Driver`.

mod registry;

#[cfg(feature = "hana")]
pub mod hana;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use registry::DriverRegistry;

use std::fmt::Debug;

use crate::config::ConnectOptions;
use crate::error::{DriverError, DriverResult};
use crate::types::{ParamKey, ProcedureBind, Value};

/// Factory for native connections, resolved by name through a [`DriverRegistry`].
pub trait Driver: Send + Sync + Debug {
    /// Canonical driver identifier.
    fn name(&self) -> &str;

    /// Open a native connection.
    fn connect(&self, options: &ConnectOptions) -> DriverResult<Box<dyn NativeConnection>>;
}

/// One physical connection.
pub trait NativeConnection: Send + Debug {
    /// Prepare a parameterized statement.
    fn prepare(&mut self, sql: &str) -> DriverResult<Box<dyn NativeStatement>>;

    /// Prepare a stored-procedure call.
    fn prepare_call(&mut self, sql: &str) -> DriverResult<Box<dyn NativeStatement>> {
        self.prepare(sql)
    }

    /// Execute unparameterized statements in one round trip.
    /// Returns the affected-row count per statement.
    fn execute_batch(&mut self, statements: &[String]) -> DriverResult<Vec<u64>>;

    fn set_auto_commit(&mut self, enabled: bool) -> DriverResult<()>;

    fn auto_commit(&self) -> DriverResult<bool>;

    fn commit(&mut self) -> DriverResult<()>;

    fn rollback(&mut self) -> DriverResult<()>;

    fn close(&mut self) -> DriverResult<()>;

    fn is_closed(&self) -> bool;
}

/// A prepared statement on a native connection.
pub trait NativeStatement: Send + Debug {
    /// Number of bind placeholders detected at prepare time.
    fn parameter_count(&self) -> usize;

    /// Row-prefetch hint. `None` restores the driver default.
    fn set_fetch_size(&mut self, fetch_size: Option<u32>) -> DriverResult<()>;

    /// Execute as a query and open a forward cursor.
    fn query(&mut self, params: &[Value]) -> DriverResult<Box<dyn NativeCursor>>;

    /// Execute as a mutation, returning the affected-row count.
    fn update(&mut self, params: &[Value]) -> DriverResult<u64>;

    /// Execute every parameter set in one round trip.
    fn execute_batch(&mut self, batch: &[Vec<Value>]) -> DriverResult<Vec<u64>>;

    /// Execute a stored-procedure call and return the OUT/INOUT values.
    fn call(&mut self, binds: &[ProcedureBind]) -> DriverResult<Vec<(ParamKey, Value)>> {
        let _ = binds;
        Err(DriverError::unsupported("stored procedure calls"))
    }

    fn close(&mut self) -> DriverResult<()>;

    fn is_closed(&self) -> bool;
}

/// Forward-only cursor over a result set.
pub trait NativeCursor: Send + Debug {
    fn columns(&self) -> &[String];

    /// Next row, or `None` once exhausted.
    fn next_row(&mut self) -> DriverResult<Option<Vec<Value>>>;

    fn close(&mut self) -> DriverResult<()>;

    fn is_closed(&self) -> bool;
}

/// Count `?` and `:name` placeholders outside quoted text and comments.
pub fn count_placeholders(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut count = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"') => {
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    i += 1;
                }
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i < bytes.len() && !(bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/')) {
                    i += 1;
                }
                i += 1;
            }
            b'?' => count += 1,
            b':' if bytes.get(i + 1) == Some(&b':') => i += 1,
            b':' if i > 0 && bytes[i - 1] == b':' => {}
            b':' if bytes
                .get(i + 1)
                .is_some_and(|b| b.is_ascii_alphabetic() || *b == b'_') =>
            {
                count += 1;
                while i + 1 < bytes.len() && (bytes[i + 1].is_ascii_alphanumeric() || bytes[i + 1] == b'_') {
                    i += 1;
                }
            }
            _ => {}
        }
        i += 1;
    }
    count
}
