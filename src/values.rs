//! Value collection for parameterized statements and typed row recovery.
//!
//! A [`ValueCollector`] receives bound values in the order their placeholders
//! appear in the rendered text; a [`SelectionResult`] hands the columns of one
//! row back, one typed read at a time.

use crate::ast::{LogicalType, Value};
use crate::core::db::RawValue;
use crate::core::{DatabaseError, Result};

/// Receives values in AST traversal order for later positional binding.
pub trait ValueCollector {
    fn collect(&mut self, value: Value);

    fn set_null(&mut self, logical_type: LogicalType) {
        self.collect(Value::Null(logical_type));
    }
}

impl ValueCollector for Vec<Value> {
    fn collect(&mut self, value: Value) {
        self.push(value);
    }
}

/// Reads the columns of a row in order, converting them to logical types.
///
/// Every read advances the position by one column. Reading past the last
/// column or reading a column that does not convert to the requested type
/// fails with `CorruptValue`; reading a null through a non-nullable accessor
/// fails with `CorruptNullValue`.
pub trait SelectionResult {
    /// Reads the next column as the given type; `None` for SQL `NULL`.
    fn next_value(&mut self, logical_type: LogicalType) -> Result<Option<Value>>;

    /// The zero-based index of the column the next read consumes.
    fn position(&self) -> usize;

    fn get_boolean(&mut self) -> Result<bool> {
        match self.required(LogicalType::Boolean)? {
            Value::Boolean(value) => Ok(value),
            other => Err(mismatch(LogicalType::Boolean, &other)),
        }
    }

    fn get_nullable_boolean(&mut self) -> Result<Option<bool>> {
        match self.next_value(LogicalType::Boolean)? {
            Some(Value::Boolean(value)) => Ok(Some(value)),
            Some(other) => Err(mismatch(LogicalType::Boolean, &other)),
            None => Ok(None),
        }
    }

    fn get_int8(&mut self) -> Result<i8> {
        match self.required(LogicalType::Int8)? {
            Value::Int8(value) => Ok(value),
            other => Err(mismatch(LogicalType::Int8, &other)),
        }
    }

    fn get_nullable_int8(&mut self) -> Result<Option<i8>> {
        match self.next_value(LogicalType::Int8)? {
            Some(Value::Int8(value)) => Ok(Some(value)),
            Some(other) => Err(mismatch(LogicalType::Int8, &other)),
            None => Ok(None),
        }
    }

    fn get_int16(&mut self) -> Result<i16> {
        match self.required(LogicalType::Int16)? {
            Value::Int16(value) => Ok(value),
            other => Err(mismatch(LogicalType::Int16, &other)),
        }
    }

    fn get_nullable_int16(&mut self) -> Result<Option<i16>> {
        match self.next_value(LogicalType::Int16)? {
            Some(Value::Int16(value)) => Ok(Some(value)),
            Some(other) => Err(mismatch(LogicalType::Int16, &other)),
            None => Ok(None),
        }
    }

    fn get_int32(&mut self) -> Result<i32> {
        match self.required(LogicalType::Int32)? {
            Value::Int32(value) => Ok(value),
            other => Err(mismatch(LogicalType::Int32, &other)),
        }
    }

    fn get_nullable_int32(&mut self) -> Result<Option<i32>> {
        match self.next_value(LogicalType::Int32)? {
            Some(Value::Int32(value)) => Ok(Some(value)),
            Some(other) => Err(mismatch(LogicalType::Int32, &other)),
            None => Ok(None),
        }
    }

    fn get_int64(&mut self) -> Result<i64> {
        match self.required(LogicalType::Int64)? {
            Value::Int64(value) => Ok(value),
            other => Err(mismatch(LogicalType::Int64, &other)),
        }
    }

    fn get_nullable_int64(&mut self) -> Result<Option<i64>> {
        match self.next_value(LogicalType::Int64)? {
            Some(Value::Int64(value)) => Ok(Some(value)),
            Some(other) => Err(mismatch(LogicalType::Int64, &other)),
            None => Ok(None),
        }
    }

    fn get_string(&mut self) -> Result<String> {
        match self.required(LogicalType::String)? {
            Value::String(value) => Ok(value),
            other => Err(mismatch(LogicalType::String, &other)),
        }
    }

    fn get_nullable_string(&mut self) -> Result<Option<String>> {
        match self.next_value(LogicalType::String)? {
            Some(Value::String(value)) => Ok(Some(value)),
            Some(other) => Err(mismatch(LogicalType::String, &other)),
            None => Ok(None),
        }
    }

    fn get_binary(&mut self) -> Result<Vec<u8>> {
        match self.required(LogicalType::Binary)? {
            Value::Binary(value) => Ok(value),
            other => Err(mismatch(LogicalType::Binary, &other)),
        }
    }

    fn get_nullable_binary(&mut self) -> Result<Option<Vec<u8>>> {
        match self.next_value(LogicalType::Binary)? {
            Some(Value::Binary(value)) => Ok(Some(value)),
            Some(other) => Err(mismatch(LogicalType::Binary, &other)),
            None => Ok(None),
        }
    }

    fn get_binary128(&mut self) -> Result<[u8; 16]> {
        match self.required(LogicalType::Binary128)? {
            Value::Binary128(value) => Ok(value),
            other => Err(mismatch(LogicalType::Binary128, &other)),
        }
    }

    fn get_nullable_binary128(&mut self) -> Result<Option<[u8; 16]>> {
        match self.next_value(LogicalType::Binary128)? {
            Some(Value::Binary128(value)) => Ok(Some(value)),
            Some(other) => Err(mismatch(LogicalType::Binary128, &other)),
            None => Ok(None),
        }
    }

    fn get_binary256(&mut self) -> Result<[u8; 32]> {
        match self.required(LogicalType::Binary256)? {
            Value::Binary256(value) => Ok(value),
            other => Err(mismatch(LogicalType::Binary256, &other)),
        }
    }

    fn get_nullable_binary256(&mut self) -> Result<Option<[u8; 32]>> {
        match self.next_value(LogicalType::Binary256)? {
            Some(Value::Binary256(value)) => Ok(Some(value)),
            Some(other) => Err(mismatch(LogicalType::Binary256, &other)),
            None => Ok(None),
        }
    }

    fn get_float32(&mut self) -> Result<f32> {
        match self.required(LogicalType::Float32)? {
            Value::Float32(value) => Ok(value),
            other => Err(mismatch(LogicalType::Float32, &other)),
        }
    }

    fn get_nullable_float32(&mut self) -> Result<Option<f32>> {
        match self.next_value(LogicalType::Float32)? {
            Some(Value::Float32(value)) => Ok(Some(value)),
            Some(other) => Err(mismatch(LogicalType::Float32, &other)),
            None => Ok(None),
        }
    }

    fn get_float64(&mut self) -> Result<f64> {
        match self.required(LogicalType::Float64)? {
            Value::Float64(value) => Ok(value),
            other => Err(mismatch(LogicalType::Float64, &other)),
        }
    }

    fn get_nullable_float64(&mut self) -> Result<Option<f64>> {
        match self.next_value(LogicalType::Float64)? {
            Some(Value::Float64(value)) => Ok(Some(value)),
            Some(other) => Err(mismatch(LogicalType::Float64, &other)),
            None => Ok(None),
        }
    }

    #[doc(hidden)]
    fn required(&mut self, logical_type: LogicalType) -> Result<Value> {
        let column = self.position();
        self.next_value(logical_type)?
            .ok_or(DatabaseError::CorruptNullValue { column })
    }
}

fn mismatch(expected: LogicalType, found: &Value) -> DatabaseError {
    DatabaseError::CorruptValue(format!(
        "expected a {} but found a {}",
        expected,
        found.logical_type()
    ))
}

/// One row returned by a driver, read through [`SelectionResult`].
#[derive(Debug, Clone, PartialEq)]
pub struct RowCursor {
    values: Vec<RawValue>,
    position: usize,
}

impl RowCursor {
    pub fn new(values: Vec<RawValue>) -> Self {
        RowCursor {
            values,
            position: 0,
        }
    }

    pub fn column_count(&self) -> usize {
        self.values.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.position >= self.values.len()
    }

    fn convert(&self, logical_type: LogicalType, raw: &RawValue) -> Result<Value> {
        let corrupt = || {
            DatabaseError::CorruptValue(format!(
                "column {} holds {:?}, which is not a {}",
                self.position, raw, logical_type
            ))
        };
        let value = match (logical_type, raw) {
            (LogicalType::Boolean, RawValue::Integer(0)) => Value::Boolean(false),
            (LogicalType::Boolean, RawValue::Integer(1)) => Value::Boolean(true),
            (LogicalType::Int8, RawValue::Integer(v)) => {
                Value::Int8(i8::try_from(*v).map_err(|_| corrupt())?)
            }
            (LogicalType::Int16, RawValue::Integer(v)) => {
                Value::Int16(i16::try_from(*v).map_err(|_| corrupt())?)
            }
            (LogicalType::Int32, RawValue::Integer(v)) => {
                Value::Int32(i32::try_from(*v).map_err(|_| corrupt())?)
            }
            (LogicalType::Int64, RawValue::Integer(v)) => Value::Int64(*v),
            (LogicalType::String, RawValue::Text(v)) => Value::String(v.clone()),
            (LogicalType::Binary, RawValue::Blob(v)) => Value::Binary(v.clone()),
            (LogicalType::Binary128, RawValue::Blob(v)) => {
                Value::Binary128(<[u8; 16]>::try_from(v.as_slice()).map_err(|_| corrupt())?)
            }
            (LogicalType::Binary256, RawValue::Blob(v)) => {
                Value::Binary256(<[u8; 32]>::try_from(v.as_slice()).map_err(|_| corrupt())?)
            }
            (LogicalType::Float32, RawValue::Real(v)) => Value::Float32(*v as f32),
            (LogicalType::Float32, RawValue::Integer(v)) => Value::Float32(*v as f32),
            (LogicalType::Float64, RawValue::Real(v)) => Value::Float64(*v),
            (LogicalType::Float64, RawValue::Integer(v)) => Value::Float64(*v as f64),
            _ => return Err(corrupt()),
        };
        Ok(value)
    }
}

impl SelectionResult for RowCursor {
    fn next_value(&mut self, logical_type: LogicalType) -> Result<Option<Value>> {
        let raw = self.values.get(self.position).ok_or_else(|| {
            DatabaseError::CorruptValue(format!(
                "the row has {} columns but column {} was read",
                self.values.len(),
                self.position
            ))
        })?;
        let value = match raw {
            RawValue::Null => None,
            raw => Some(self.convert(logical_type, raw)?),
        };
        self.position += 1;
        Ok(value)
    }

    fn position(&self) -> usize {
        self.position
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_keeps_order() {
        let mut values: Vec<Value> = Vec::new();
        values.collect(Value::Boolean(true));
        values.set_null(LogicalType::String);
        values.collect(Value::Int32(7));
        assert_eq!(
            values,
            vec![
                Value::Boolean(true),
                Value::Null(LogicalType::String),
                Value::Int32(7)
            ]
        );
    }

    #[test]
    fn test_reads_typed_columns_in_order() {
        let mut row = RowCursor::new(vec![
            RawValue::Integer(1),
            RawValue::Integer(14),
            RawValue::Text("alice".to_string()),
            RawValue::Blob(vec![7; 16]),
            RawValue::Real(1.5),
            RawValue::Null,
        ]);
        assert!(row.get_boolean().unwrap());
        assert_eq!(row.get_int32().unwrap(), 14);
        assert_eq!(row.get_string().unwrap(), "alice");
        assert_eq!(row.get_binary128().unwrap(), [7; 16]);
        assert_eq!(row.get_float64().unwrap(), 1.5);
        assert_eq!(row.get_nullable_string().unwrap(), None);
        assert!(row.is_exhausted());
    }

    #[test]
    fn test_reading_past_the_last_column_is_corrupt() {
        let mut row = RowCursor::new(vec![RawValue::Integer(1)]);
        row.get_int64().unwrap();
        assert!(matches!(row.get_int64(), Err(DatabaseError::CorruptValue(_))));
    }

    #[test]
    fn test_type_mismatches_are_corrupt() {
        let mut row = RowCursor::new(vec![RawValue::Text("x".to_string())]);
        assert!(matches!(row.get_int32(), Err(DatabaseError::CorruptValue(_))));

        let mut row = RowCursor::new(vec![RawValue::Integer(300)]);
        assert!(matches!(row.get_int8(), Err(DatabaseError::CorruptValue(_))));

        let mut row = RowCursor::new(vec![RawValue::Integer(2)]);
        assert!(matches!(row.get_boolean(), Err(DatabaseError::CorruptValue(_))));

        let mut row = RowCursor::new(vec![RawValue::Blob(vec![0; 31])]);
        assert!(matches!(row.get_binary256(), Err(DatabaseError::CorruptValue(_))));
    }

    #[test]
    fn test_null_into_non_nullable_target() {
        let mut row = RowCursor::new(vec![RawValue::Integer(3), RawValue::Null]);
        row.get_int64().unwrap();
        match row.get_int64() {
            Err(DatabaseError::CorruptNullValue { column }) => assert_eq!(column, 1),
            other => panic!("Expected CorruptNullValue, got {:?}", other),
        }
    }

    #[test]
    fn test_nullable_getters_for_every_type() {
        let mut nulls = RowCursor::new(vec![RawValue::Null; 8]);
        assert_eq!(nulls.get_nullable_int8().unwrap(), None);
        assert_eq!(nulls.get_nullable_int16().unwrap(), None);
        assert_eq!(nulls.get_nullable_int32().unwrap(), None);
        assert_eq!(nulls.get_nullable_binary().unwrap(), None);
        assert_eq!(nulls.get_nullable_binary128().unwrap(), None);
        assert_eq!(nulls.get_nullable_binary256().unwrap(), None);
        assert_eq!(nulls.get_nullable_float32().unwrap(), None);
        assert_eq!(nulls.get_nullable_float64().unwrap(), None);
        assert!(nulls.is_exhausted());

        let mut values = RowCursor::new(vec![
            RawValue::Integer(-8),
            RawValue::Integer(300),
            RawValue::Integer(70_000),
            RawValue::Blob(vec![1, 2]),
            RawValue::Blob(vec![4; 16]),
            RawValue::Blob(vec![5; 32]),
            RawValue::Real(0.5),
            RawValue::Real(2.25),
        ]);
        assert_eq!(values.get_nullable_int8().unwrap(), Some(-8));
        assert_eq!(values.get_nullable_int16().unwrap(), Some(300));
        assert_eq!(values.get_nullable_int32().unwrap(), Some(70_000));
        assert_eq!(values.get_nullable_binary().unwrap(), Some(vec![1, 2]));
        assert_eq!(values.get_nullable_binary128().unwrap(), Some([4; 16]));
        assert_eq!(values.get_nullable_binary256().unwrap(), Some([5; 32]));
        assert_eq!(values.get_nullable_float32().unwrap(), Some(0.5));
        assert_eq!(values.get_nullable_float64().unwrap(), Some(2.25));

        let mut short = RowCursor::new(vec![RawValue::Blob(vec![1; 15])]);
        assert!(matches!(short.get_nullable_binary128(), Err(DatabaseError::CorruptValue(_))));
    }
}
