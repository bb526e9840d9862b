//! Values, declared SQL types and stored-procedure parameter slots.

mod call;
mod sql_type;
mod value;

pub(crate) use call::normalize_name;
pub use call::{CallParam, ParamKey, ProcedureBind};
pub use sql_type::SqlType;
pub use value::{FromValue, Value};
