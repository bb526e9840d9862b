//! Connection, statement-pool and transaction management over native SQL
//! drivers.
//!
//! A [`Connection`] wraps one native connection resolved by name through a
//! [`DriverRegistry`]. Prepared and callable statements are tracked in a
//! per-connection [`StatementPool`] and closed together with it; ad hoc
//! queries run on short-lived statements. Rows are materialized into
//! [`Row`] values addressable by position or column name.
//!
//! # Features
//!
//! - `sqlite` (default): bundled `SQLite` driver via `rusqlite`
//! - `hana`: SAP HANA driver via `hdbconnect`
//!
//! # Example
//!
//! ```rust,ignore
//! use sqlhelper::{params, ConnectOptions, Connection};
//!
//! let conn = Connection::open(ConnectOptions::new("sqlite", ":memory:"))?;
//! conn.update("create table t (a int, b varchar(10))")?;
//! conn.update_with("insert into t values (?, ?)", &params![1, "A"])?;
//! for row in conn.enumerate("select a, b from t")? {
//!     let row = row?;
//!     println!("{} {}", row["a"], row[1]);
//! }
//! ```

pub mod config;
pub mod connection;
pub mod constants;
pub mod driver;
pub mod error;
pub mod observability;
pub mod pool;
pub mod row;
pub mod statement;
pub mod types;

#[cfg(test)]
mod testing;

pub use config::{ConnectOptions, ConnectOptionsBuilder};
pub use connection::{
    AccumulatedStat, Connection, ExecutionKind, ExecutionStat, StatementInfo, Transaction,
    TxOutcome,
};
pub use driver::DriverRegistry;
pub use error::{DriverError, Error, Result};
pub use observability::{LogConfig, init_logging};
pub use pool::{PoolStats, StatementId, StatementPool};
pub use row::{ColumnIndex, Row};
pub use statement::{
    CallArgs, CallResult, CallableStatement, PreparedStatement, Rows, StatementKind,
};
pub use types::{CallParam, FromValue, ParamKey, ProcedureBind, SqlType, Value};

/// Build a `Vec<Value>` of bind parameters.
///
/// ```rust,ignore
/// stmt.update(&params![1, "A", None::<i64>])?;
/// ```
#[macro_export]
macro_rules! params {
    () => {
        ::std::vec::Vec::<$crate::Value>::new()
    };
    ($($value:expr),+ $(,)?) => {
        ::std::vec![$($crate::Value::from($value)),+]
    };
}
