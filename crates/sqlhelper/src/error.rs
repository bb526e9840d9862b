//! Error types for sqlhelper.
//!
//! Errors fall into a small taxonomy:
//! - `Config` / `DriverNotFound`: connect-time configuration problems
//! - `ConnectionClosed` / `StatementClosed` / `CursorClosed`: use after close
//! - `NestingLimit`: too many nested row-producing executions on one connection
//! - `Argument` / `Conversion`: malformed arguments detected before dispatch
//! - `Driver`: anything reported by the native driver, passed through unmodified

use thiserror::Error;

/// Error reported by a native driver.
///
/// Carries the driver's message, an optional vendor error code and the
/// original error as `source` when the adapter has one.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct DriverError {
    pub(crate) message: String,
    pub(crate) code: Option<i32>,
    #[source]
    pub(crate) source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl DriverError {
    /// Create a driver error from a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            source: None,
        }
    }

    /// Create an error for an operation the driver does not implement.
    #[must_use]
    pub fn unsupported(operation: &str) -> Self {
        Self::new(format!("{operation} is not supported by this driver"))
    }

    /// Attach a vendor error code.
    #[must_use]
    pub const fn with_code(mut self, code: i32) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach the underlying error.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// The driver's message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The vendor error code, if the driver reported one.
    #[must_use]
    pub const fn code(&self) -> Option<i32> {
        self.code
    }
}

/// Root error type for sqlhelper.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Invalid or incomplete connection configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The configured driver identifier is not registered.
    #[error("Driver not found: {0}")]
    DriverNotFound(String),

    /// Operation on a closed connection.
    #[error("connection is closed")]
    ConnectionClosed,

    /// Operation on a closed statement.
    #[error("statement is closed")]
    StatementClosed,

    /// Operation on a released cursor.
    #[error("cursor is closed")]
    CursorClosed,

    /// Row-producing executions nested deeper than the pool allows.
    #[error("statement nesting level is too deep (max {max})")]
    NestingLimit { max: usize },

    /// Malformed argument detected before reaching the driver.
    #[error("Invalid argument: {0}")]
    Argument(String),

    /// A value could not be converted to the requested Rust type.
    #[error("Conversion error: {0}")]
    Conversion(String),

    /// Transaction misuse (nested scope, double commit/rollback).
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Positional row access past the end of the row.
    #[error("index {index} out of range for row of length {len}")]
    RowIndexOutOfRange { index: usize, len: usize },

    /// Row access by a name that is not a column of the row.
    #[error("no column named '{0}'")]
    ColumnNotFound(String),

    /// Error reported by the native driver.
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),
}

impl Error {
    /// Create a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an argument error.
    #[must_use]
    pub fn argument(msg: impl Into<String>) -> Self {
        Self::Argument(msg.into())
    }

    /// Create a conversion error.
    #[must_use]
    pub fn conversion(msg: impl Into<String>) -> Self {
        Self::Conversion(msg.into())
    }

    /// Create a transaction error.
    #[must_use]
    pub fn transaction(msg: impl Into<String>) -> Self {
        Self::Transaction(msg.into())
    }

    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config(_) | Self::DriverNotFound(_))
    }

    #[must_use]
    pub const fn is_driver_not_found(&self) -> bool {
        matches!(self, Self::DriverNotFound(_))
    }

    /// Returns true for any use-after-close error.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(
            self,
            Self::ConnectionClosed | Self::StatementClosed | Self::CursorClosed
        )
    }

    #[must_use]
    pub const fn is_nesting_limit(&self) -> bool {
        matches!(self, Self::NestingLimit { .. })
    }

    #[must_use]
    pub const fn is_argument(&self) -> bool {
        matches!(self, Self::Argument(_))
    }

    #[must_use]
    pub const fn is_conversion(&self) -> bool {
        matches!(self, Self::Conversion(_))
    }

    #[must_use]
    pub const fn is_transaction(&self) -> bool {
        matches!(self, Self::Transaction(_))
    }

    #[must_use]
    pub const fn is_out_of_range(&self) -> bool {
        matches!(self, Self::RowIndexOutOfRange { .. })
    }

    #[must_use]
    pub const fn is_column_not_found(&self) -> bool {
        matches!(self, Self::ColumnNotFound(_))
    }

    #[must_use]
    pub const fn is_driver(&self) -> bool {
        matches!(self, Self::Driver(_))
    }

    /// The underlying driver error, if this is one.
    #[must_use]
    pub const fn as_driver_error(&self) -> Option<&DriverError> {
        match self {
            Self::Driver(err) => Some(err),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Result type used at the native driver boundary.
pub type DriverResult<T> = std::result::Result<T, DriverError>;
