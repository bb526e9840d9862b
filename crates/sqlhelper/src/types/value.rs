//! SQL values exchanged with native drivers.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;

use crate::error::{Error, Result};

const TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];
const TIME_FORMAT: &str = "%H:%M:%S%.f";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// A single column or parameter value.
///
/// Serializes untagged, so a row of values renders as plain JSON scalars.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
}

impl Value {
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Short name of the variant, used in conversion errors.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Bool(_) => "BOOLEAN",
            Self::Int(_) => "INTEGER",
            Self::Double(_) => "DOUBLE",
            Self::Text(_) => "TEXT",
            Self::Bytes(_) => "BINARY",
            Self::Date(_) => "DATE",
            Self::Time(_) => "TIME",
            Self::Timestamp(_) => "TIMESTAMP",
        }
    }

    /// Parse a textual timestamp in ISO-8601 or SQL form.
    pub(crate) fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
        let text = text.trim();
        TIMESTAMP_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
            .or_else(|| {
                NaiveDate::parse_from_str(text, DATE_FORMAT)
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            })
    }

    pub(crate) fn parse_date(text: &str) -> Option<NaiveDate> {
        let text = text.trim();
        NaiveDate::parse_from_str(text, DATE_FORMAT)
            .ok()
            .or_else(|| Self::parse_timestamp(text).map(|ts| ts.date()))
    }

    pub(crate) fn parse_time(text: &str) -> Option<NaiveTime> {
        NaiveTime::parse_from_str(text.trim(), TIME_FORMAT).ok()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
            Self::Bytes(v) => {
                for byte in v {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
            Self::Date(v) => write!(f, "{}", v.format(DATE_FORMAT)),
            Self::Time(v) => write!(f, "{}", v.format(TIME_FORMAT)),
            Self::Timestamp(v) => write!(f, "{}", v.format(TIMESTAMP_FORMATS[0])),
        }
    }
}

macro_rules! impl_from_int {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Self::Int(i64::from(v))
                }
            }
        )*
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Double(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Self::Text(v.clone())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Self::Bytes(v.to_vec())
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Self::Date(v)
    }
}

impl From<NaiveTime> for Value {
    fn from(v: NaiveTime) -> Self {
        Self::Time(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Self::Timestamp(v)
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Conversion from a [`Value`] into a Rust type.
pub trait FromValue: Sized {
    /// Convert a borrowed value.
    ///
    /// # Errors
    ///
    /// Returns `Error::Conversion` if the value cannot represent `Self`.
    fn from_value(value: &Value) -> Result<Self>;
}

fn mismatch<T>(value: &Value, target: &str) -> Result<T> {
    Err(Error::conversion(format!(
        "cannot convert {} value '{value}' to {target}",
        value.type_name()
    )))
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Int(v) => Ok(*v),
            Value::Bool(v) => Ok(Self::from(*v)),
            Value::Text(s) => s.trim().parse().or_else(|_| mismatch(value, "i64")),
            _ => mismatch(value, "i64"),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> Result<Self> {
        let wide = i64::from_value(value)?;
        Self::try_from(wide).or_else(|_| mismatch(value, "i32"))
    }
}

impl FromValue for f64 {
    #[allow(clippy::cast_precision_loss)]
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Double(v) => Ok(*v),
            Value::Int(v) => Ok(*v as Self),
            Value::Text(s) => s.trim().parse().or_else(|_| mismatch(value, "f64")),
            _ => mismatch(value, "f64"),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Bool(v) => Ok(*v),
            Value::Int(v) => Ok(*v != 0),
            Value::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => mismatch(value, "bool"),
            },
            _ => mismatch(value, "bool"),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null | Value::Bytes(_) => mismatch(value, "String"),
            Value::Text(s) => Ok(s.clone()),
            other => Ok(other.to_string()),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Bytes(v) => Ok(v.clone()),
            Value::Text(s) => Ok(s.as_bytes().to_vec()),
            _ => mismatch(value, "bytes"),
        }
    }
}

impl FromValue for NaiveDateTime {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Timestamp(v) => Ok(*v),
            Value::Date(d) => d.and_hms_opt(0, 0, 0).map_or_else(|| mismatch(value, "timestamp"), Ok),
            Value::Text(s) => Value::parse_timestamp(s).map_or_else(|| mismatch(value, "timestamp"), Ok),
            _ => mismatch(value, "timestamp"),
        }
    }
}

impl FromValue for NaiveDate {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Date(v) => Ok(*v),
            Value::Timestamp(ts) => Ok(ts.date()),
            Value::Text(s) => Value::parse_date(s).map_or_else(|| mismatch(value, "date"), Ok),
            _ => mismatch(value, "date"),
        }
    }
}

impl FromValue for NaiveTime {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Time(v) => Ok(*v),
            Value::Timestamp(ts) => Ok(ts.time()),
            Value::Text(s) => Value::parse_time(s).map_or_else(|| mismatch(value, "time"), Ok),
            _ => mismatch(value, "time"),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_maps_to_null() {
        assert_eq!(Value::from(None::<i32>), Value::Null);
        assert_eq!(Value::from(Some("a")), Value::Text("a".to_string()));
    }

    #[test]
    fn test_int_conversions() {
        assert_eq!(i64::from_value(&Value::Int(1000)).unwrap(), 1000);
        assert_eq!(i32::from_value(&Value::Text(" 42 ".into())).unwrap(), 42);
        assert!(i32::from_value(&Value::Int(i64::MAX)).unwrap_err().is_conversion());
        assert!(i64::from_value(&Value::Null).is_err());
    }

    #[test]
    fn test_option_from_null() {
        assert_eq!(Option::<i64>::from_value(&Value::Null).unwrap(), None);
        assert_eq!(Option::<i64>::from_value(&Value::Int(3)).unwrap(), Some(3));
    }

    #[test]
    fn test_timestamp_from_text() {
        let expected = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(12, 30, 0)
            .unwrap();
        let sql = Value::Text("2024-05-01 12:30:00".into());
        let iso = Value::Text("2024-05-01T12:30:00.000".into());
        assert_eq!(NaiveDateTime::from_value(&sql).unwrap(), expected);
        assert_eq!(NaiveDateTime::from_value(&iso).unwrap(), expected);
        assert_eq!(
            NaiveDate::from_value(&sql).unwrap(),
            NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Null.to_string(), "NULL");
        assert_eq!(Value::Bytes(vec![0xde, 0xad]).to_string(), "dead");
        assert_eq!(Value::from(1.5).to_string(), "1.5");
    }

    #[test]
    fn test_serialize_untagged() {
        let json = serde_json::to_string(&vec![Value::Int(1), Value::Null, Value::from("x")]).unwrap();
        assert_eq!(json, r#"[1,null,"x"]"#);
    }
}
