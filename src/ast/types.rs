//! Logical column types and the typed values that travel with them.

use std::fmt;

/// A backend-independent column type.
///
/// Every dialect maps each of these to exactly one column syntax; the mapping
/// is an exhaustive `match`, so adding a variant fails to compile until every
/// dialect handles it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LogicalType {
    Boolean,
    Int8,
    Int16,
    Int32,
    Int64,
    String,
    Binary,
    /// Fixed-width 16-byte value, used for vectors
    Binary128,
    /// Fixed-width 32-byte value, used for hashes
    Binary256,
    Float32,
    Float64,
}

impl LogicalType {
    pub const ALL: [LogicalType; 11] = [
        LogicalType::Boolean,
        LogicalType::Int8,
        LogicalType::Int16,
        LogicalType::Int32,
        LogicalType::Int64,
        LogicalType::String,
        LogicalType::Binary,
        LogicalType::Binary128,
        LogicalType::Binary256,
        LogicalType::Float32,
        LogicalType::Float64,
    ];

    pub fn name(self) -> &'static str {
        match self {
            LogicalType::Boolean => "boolean",
            LogicalType::Int8 => "int8",
            LogicalType::Int16 => "int16",
            LogicalType::Int32 => "int32",
            LogicalType::Int64 => "int64",
            LogicalType::String => "string",
            LogicalType::Binary => "binary",
            LogicalType::Binary128 => "binary128",
            LogicalType::Binary256 => "binary256",
            LogicalType::Float32 => "float32",
            LogicalType::Float64 => "float64",
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            LogicalType::Int8 | LogicalType::Int16 | LogicalType::Int32 | LogicalType::Int64
        )
    }

    /// The exact byte width of the fixed-width binary types.
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            LogicalType::Binary128 => Some(16),
            LogicalType::Binary256 => Some(32),
            _ => None,
        }
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A value of a logical type, as bound to a positional parameter or recovered
/// from a row.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A null still knows the type of the column it stands for
    Null(LogicalType),
    Boolean(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    String(String),
    Binary(Vec<u8>),
    Binary128([u8; 16]),
    Binary256([u8; 32]),
    Float32(f32),
    Float64(f64),
}

impl Value {
    pub fn logical_type(&self) -> LogicalType {
        match self {
            Value::Null(logical_type) => *logical_type,
            Value::Boolean(_) => LogicalType::Boolean,
            Value::Int8(_) => LogicalType::Int8,
            Value::Int16(_) => LogicalType::Int16,
            Value::Int32(_) => LogicalType::Int32,
            Value::Int64(_) => LogicalType::Int64,
            Value::String(_) => LogicalType::String,
            Value::Binary(_) => LogicalType::Binary,
            Value::Binary128(_) => LogicalType::Binary128,
            Value::Binary256(_) => LogicalType::Binary256,
            Value::Float32(_) => LogicalType::Float32,
            Value::Float64(_) => LogicalType::Float64,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null(_))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<i8> for Value {
    fn from(value: i8) -> Self {
        Value::Int8(value)
    }
}

impl From<i16> for Value {
    fn from(value: i16) -> Self {
        Value::Int16(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int32(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int64(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float32(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float64(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Binary(value)
    }
}
