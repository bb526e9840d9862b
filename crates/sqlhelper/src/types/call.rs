//! Stored-procedure parameter slots.

use std::fmt;

use super::sql_type::SqlType;
use super::value::Value;

/// Direction and payload of one stored-procedure parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum CallParam {
    /// Input only. `In(Value::Null)` binds SQL NULL.
    In(Value),
    /// Input value plus the expected output type.
    InOut(Value, SqlType),
    /// Output only, no input value.
    Out(SqlType),
}

impl CallParam {
    pub fn input(value: impl Into<Value>) -> Self {
        Self::In(value.into())
    }

    pub fn in_out(value: impl Into<Value>, ty: SqlType) -> Self {
        Self::InOut(value.into(), ty)
    }

    #[must_use]
    pub const fn out(ty: SqlType) -> Self {
        Self::Out(ty)
    }

    /// Whether the slot yields a value after the call.
    #[must_use]
    pub const fn is_output(&self) -> bool {
        matches!(self, Self::InOut(..) | Self::Out(_))
    }

    /// The declared output type, if any.
    #[must_use]
    pub const fn output_type(&self) -> Option<SqlType> {
        match self {
            Self::In(_) => None,
            Self::InOut(_, ty) | Self::Out(ty) => Some(*ty),
        }
    }

    /// The bound input value, if any.
    #[must_use]
    pub const fn input_value(&self) -> Option<&Value> {
        match self {
            Self::In(v) | Self::InOut(v, _) => Some(v),
            Self::Out(_) => None,
        }
    }
}

impl From<Value> for CallParam {
    fn from(value: Value) -> Self {
        Self::In(value)
    }
}

impl From<SqlType> for CallParam {
    fn from(ty: SqlType) -> Self {
        Self::Out(ty)
    }
}

impl<V: Into<Value>> From<(V, SqlType)> for CallParam {
    fn from((value, ty): (V, SqlType)) -> Self {
        Self::InOut(value.into(), ty)
    }
}

/// Key of a stored-procedure parameter: 1-based ordinal or normalized name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParamKey {
    Position(usize),
    Name(String),
}

impl ParamKey {
    /// Build a name key. A leading `:` is stripped and the name lowercased,
    /// so `":IO1"`, `"io1"` and `"Io1"` address the same slot.
    pub fn name(name: impl AsRef<str>) -> Self {
        Self::Name(normalize_name(name.as_ref()))
    }
}

pub(crate) fn normalize_name(name: &str) -> String {
    name.trim().trim_start_matches(':').to_lowercase()
}

impl From<usize> for ParamKey {
    fn from(position: usize) -> Self {
        Self::Position(position)
    }
}

impl From<&str> for ParamKey {
    fn from(name: &str) -> Self {
        Self::name(name)
    }
}

impl From<String> for ParamKey {
    fn from(name: String) -> Self {
        Self::name(name)
    }
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Position(p) => write!(f, "{p}"),
            Self::Name(n) => write!(f, ":{n}"),
        }
    }
}

/// One resolved parameter handed to a native driver's call API.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcedureBind {
    pub key: ParamKey,
    pub param: CallParam,
}
