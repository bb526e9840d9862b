//! Declared SQL types for stored-procedure OUT and INOUT slots.

use std::fmt;
use std::str::FromStr;

use super::value::{FromValue, Value};
use crate::error::{Error, Result};

/// SQL type registered for an output parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    Boolean,
    Integer,
    BigInt,
    Double,
    Varchar,
    Binary,
    Date,
    Time,
    Timestamp,
}

impl SqlType {
    /// Coerce an input value to this type before it is bound.
    ///
    /// NULL coerces to NULL for every type.
    ///
    /// # Errors
    ///
    /// Returns `Error::Argument` when the value cannot be represented.
    pub fn coerce(self, value: &Value) -> Result<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        let coerced = match self {
            Self::Boolean => bool::from_value(value).map(Value::Bool),
            Self::Integer => i32::from_value(value).map(Value::from),
            Self::BigInt => i64::from_value(value).map(Value::Int),
            Self::Double => f64::from_value(value).map(Value::Double),
            Self::Varchar => String::from_value(value).map(Value::Text),
            Self::Binary => Vec::<u8>::from_value(value).map(Value::Bytes),
            Self::Date => chrono::NaiveDate::from_value(value).map(Value::Date),
            Self::Time => chrono::NaiveTime::from_value(value).map(Value::Time),
            Self::Timestamp => chrono::NaiveDateTime::from_value(value).map(Value::Timestamp),
        };
        coerced.map_err(|_| {
            Error::argument(format!(
                "cannot bind {} value '{value}' as {self}",
                value.type_name()
            ))
        })
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Boolean => "BOOLEAN",
            Self::Integer => "INTEGER",
            Self::BigInt => "BIGINT",
            Self::Double => "DOUBLE",
            Self::Varchar => "VARCHAR",
            Self::Binary => "BINARY",
            Self::Date => "DATE",
            Self::Time => "TIME",
            Self::Timestamp => "TIMESTAMP",
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SqlType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BOOLEAN" | "BOOL" | "BIT" => Ok(Self::Boolean),
            "INTEGER" | "INT" | "SMALLINT" | "TINYINT" => Ok(Self::Integer),
            "BIGINT" => Ok(Self::BigInt),
            "DOUBLE" | "FLOAT" | "REAL" | "DECIMAL" | "NUMERIC" => Ok(Self::Double),
            "VARCHAR" | "NVARCHAR" | "CHAR" | "NCHAR" | "TEXT" | "STRING" => Ok(Self::Varchar),
            "BINARY" | "VARBINARY" | "BLOB" => Ok(Self::Binary),
            "DATE" => Ok(Self::Date),
            "TIME" => Ok(Self::Time),
            "TIMESTAMP" | "DATETIME" => Ok(Self::Timestamp),
            other => Err(Error::argument(format!("unknown SQL type '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce_text_to_integer() {
        let v = SqlType::Integer.coerce(&Value::from("100")).unwrap();
        assert_eq!(v, Value::Int(100));
    }

    #[test]
    fn test_coerce_integer_to_varchar() {
        let v = SqlType::Varchar.coerce(&Value::Int(7)).unwrap();
        assert_eq!(v, Value::from("7"));
    }

    #[test]
    fn test_coerce_failure_is_argument_error() {
        let err = SqlType::Integer.coerce(&Value::from("hello")).unwrap_err();
        assert!(err.is_argument());
    }

    #[test]
    fn test_null_coerces_for_every_type() {
        assert_eq!(SqlType::Date.coerce(&Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn test_from_str_aliases() {
        assert_eq!("int".parse::<SqlType>().unwrap(), SqlType::Integer);
        assert_eq!("nvarchar".parse::<SqlType>().unwrap(), SqlType::Varchar);
        assert!("geometry".parse::<SqlType>().unwrap_err().is_argument());
    }
}
