//! Column data types and typed values.

use serde::{Deserialize, Serialize};

/// Declared type of a table column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum DataType {
    Boolean = 1,

    // Integer types
    Byte = 10,
    Int = 11,
    Long = 12,
    BigInt = 13,

    // Floating point
    Double = 20,

    // Milliseconds since the Unix epoch
    DateTime = 30,

    // Variable-length types
    Text = 40,
    Binary = 41,
}

impl DataType {
    /// Returns the fixed byte size for this type, or None for variable-length types.
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            DataType::Boolean | DataType::Byte => Some(1),
            DataType::Int => Some(2),
            DataType::Long => Some(4),
            DataType::BigInt | DataType::Double | DataType::DateTime => Some(8),
            DataType::Text | DataType::Binary => None,
        }
    }

    /// Returns true if this type is an integer type.
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            DataType::Byte | DataType::Int | DataType::Long | DataType::BigInt
        )
    }

    /// Returns true if this type is numeric.
    pub fn is_numeric(&self) -> bool {
        self.is_integer() || *self == DataType::Double
    }

    /// Returns true if this type is a text type.
    pub fn is_textual(&self) -> bool {
        *self == DataType::Text
    }

    pub(crate) fn from_u8(raw: u8) -> Option<Self> {
        Some(match raw {
            1 => DataType::Boolean,
            10 => DataType::Byte,
            11 => DataType::Int,
            12 => DataType::Long,
            13 => DataType::BigInt,
            20 => DataType::Double,
            30 => DataType::DateTime,
            40 => DataType::Text,
            41 => DataType::Binary,
            _ => return None,
        })
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DataType::Boolean => "BOOLEAN",
            DataType::Byte => "BYTE",
            DataType::Int => "INT",
            DataType::Long => "LONG",
            DataType::BigInt => "BIGINT",
            DataType::Double => "DOUBLE",
            DataType::DateTime => "DATETIME",
            DataType::Text => "TEXT",
            DataType::Binary => "BINARY",
        };
        write!(f, "{}", name)
    }
}

impl TryFrom<u8> for DataType {
    type Error = u8;

    fn try_from(raw: u8) -> std::result::Result<Self, u8> {
        DataType::from_u8(raw).ok_or(raw)
    }
}

/// A typed column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Boolean(bool),
    Byte(u8),
    Int(i16),
    Long(i32),
    BigInt(i64),
    Double(f64),
    DateTime(i64),
    Text(String),
    Binary(Vec<u8>),
}

impl Value {
    /// Returns true for SQL-style null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the natural data type of this value, or None for null.
    pub fn data_type(&self) -> Option<DataType> {
        Some(match self {
            Value::Null => return None,
            Value::Boolean(_) => DataType::Boolean,
            Value::Byte(_) => DataType::Byte,
            Value::Int(_) => DataType::Int,
            Value::Long(_) => DataType::Long,
            Value::BigInt(_) => DataType::BigInt,
            Value::Double(_) => DataType::Double,
            Value::DateTime(_) => DataType::DateTime,
            Value::Text(_) => DataType::Text,
            Value::Binary(_) => DataType::Binary,
        })
    }

    /// Widens any integer-like value to i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Boolean(b) => Some(*b as i64),
            Value::Byte(v) => Some(*v as i64),
            Value::Int(v) => Some(*v as i64),
            Value::Long(v) => Some(*v as i64),
            Value::BigInt(v) | Value::DateTime(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns any numeric value as f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    /// Returns the text content, if this is a text value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Converts this value to the representation of `ty`, or None when the
    /// value cannot be represented (out of range, unparseable text).
    pub fn coerce_to(&self, ty: DataType) -> Option<Value> {
        if self.is_null() {
            return Some(Value::Null);
        }
        let integral = || -> Option<i64> {
            match self {
                Value::Double(v) if v.fract() == 0.0 => Some(*v as i64),
                Value::Text(s) => s.trim().parse().ok(),
                other => other.as_i64(),
            }
        };
        match ty {
            DataType::Boolean => match self {
                Value::Boolean(b) => Some(Value::Boolean(*b)),
                _ => integral().map(|v| Value::Boolean(v != 0)),
            },
            DataType::Byte => integral().and_then(|v| u8::try_from(v).ok()).map(Value::Byte),
            DataType::Int => integral().and_then(|v| i16::try_from(v).ok()).map(Value::Int),
            DataType::Long => integral().and_then(|v| i32::try_from(v).ok()).map(Value::Long),
            DataType::BigInt => integral().map(Value::BigInt),
            DataType::DateTime => integral().map(Value::DateTime),
            DataType::Double => match self {
                Value::Text(s) => s.trim().parse().ok().map(Value::Double),
                other => other.as_f64().map(Value::Double),
            },
            DataType::Text => match self {
                Value::Text(s) => Some(Value::Text(s.clone())),
                Value::Binary(_) => None,
                other => Some(Value::Text(other.to_string())),
            },
            DataType::Binary => match self {
                Value::Binary(b) => Some(Value::Binary(b.clone())),
                _ => None,
            },
        }
    }

    /// Equality that tolerates differing numeric widths, so `Long(3)`
    /// equals `BigInt(3)` and `Double(3.0)`.
    pub fn loosely_equals(&self, other: &Value) -> bool {
        if self == other {
            return true;
        }
        match (self, other) {
            (Value::Double(_), _) | (_, Value::Double(_)) => {
                match (self.as_f64(), other.as_f64()) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                }
            }
            _ => match (self.as_i64(), other.as_i64()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(v) => write!(f, "{}", v),
            Value::Byte(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Long(v) => write!(f, "{}", v),
            Value::BigInt(v) | Value::DateTime(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Text(s) => write!(f, "'{}'", s),
            Value::Binary(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::Byte(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Long(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Binary(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}
