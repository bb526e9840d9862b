//! Prepared and callable statements and the row sequences they produce.

mod callable;
mod state;
mod prepared;
mod rows;

pub use callable::{CallArgs, CallResult, CallableStatement};
pub use state::{SharedStatement, StatementCore, StatementKind};
pub use prepared::PreparedStatement;
pub use rows::Rows;
