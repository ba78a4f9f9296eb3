use crate::decimal::DecimalValue;
use std::fmt;
use std::sync::Arc;

/// Logical column type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Int64,
    Float64,
    Boolean,
    /// Days since 1970-01-01.
    Date32,
    /// Fixed-point decimal. `scale` is `None` when the producer did not carry
    /// type metadata; readers then fall back to a configured default.
    Decimal128 { precision: u8, scale: Option<i8> },
    /// Dictionary-encoded UTF-8 strings.
    Utf8,
}

impl ColumnType {
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            ColumnType::Int64 | ColumnType::Float64 | ColumnType::Decimal128 { .. }
        )
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Int64 => f.write_str("int64"),
            ColumnType::Float64 => f.write_str("float64"),
            ColumnType::Boolean => f.write_str("boolean"),
            ColumnType::Date32 => f.write_str("date32"),
            ColumnType::Decimal128 {
                precision,
                scale: Some(scale),
            } => write!(f, "decimal({precision}, {scale})"),
            ColumnType::Decimal128 {
                precision,
                scale: None,
            } => write!(f, "decimal({precision}, ?)"),
            ColumnType::Utf8 => f.write_str("utf8"),
        }
    }
}

/// A single cell, used when building tables row by row and when reading
/// individual cells back.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Boolean(bool),
    Date(i32),
    Decimal(DecimalValue),
    String(Arc<str>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(Arc::from(v))
    }
}

impl From<DecimalValue> for Value {
    fn from(v: DecimalValue) -> Self {
        Value::Decimal(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Boolean(v) => write!(f, "{v}"),
            Value::Date(days) => match crate::date::date_from_days(*days) {
                Some(date) => write!(f, "{date}"),
                None => write!(f, "date({days})"),
            },
            Value::Decimal(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "{v:?}"),
        }
    }
}
