/// SQLite Driver Module
///
/// This module implements the driver seam on top of `rusqlite`. It backs both
/// the SQLite and the embedded dialect.
use crate::ast::Value;
use crate::core::db::driver::{Driver, DriverConnection, DriverError, RawValue};
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{params_from_iter, Connection, ToSql};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Default time a statement waits for a lock held by another connection
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqliteLocation {
    File(PathBuf),
    /// Every connection opens its own private in-memory database
    Memory,
}

#[derive(Debug, Clone)]
pub struct SqliteDriver {
    location: SqliteLocation,
    busy_timeout: Duration,
}

impl SqliteDriver {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        SqliteDriver {
            location: SqliteLocation::File(path.into()),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    pub fn in_memory() -> Self {
        SqliteDriver {
            location: SqliteLocation::Memory,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    pub fn location(&self) -> &SqliteLocation {
        &self.location
    }
}

impl Driver for SqliteDriver {
    fn connect(&self) -> Result<Box<dyn DriverConnection>, DriverError> {
        let connection = match &self.location {
            SqliteLocation::File(path) => {
                debug!("Opening SQLite database at {:?}", path);
                Connection::open(path)?
            }
            SqliteLocation::Memory => {
                debug!("Opening in-memory SQLite database");
                Connection::open_in_memory()?
            }
        };
        connection.pragma_update(None, "foreign_keys", "ON")?;
        connection.busy_timeout(self.busy_timeout)?;
        Ok(Box::new(SqliteConnection { connection }))
    }
}

/// A `rusqlite` connection whose transactions begin lazily with the first
/// modifying statement, so that nothing is ever committed implicitly.
///
/// Queries outside a transaction run in autocommit and release SQLite's
/// shared lock as soon as their rows are read.
#[derive(Debug)]
pub struct SqliteConnection {
    connection: Connection,
}

impl SqliteConnection {
    fn begin(&self) -> Result<(), DriverError> {
        if self.connection.is_autocommit() {
            self.connection.execute_batch("BEGIN")?;
        }
        Ok(())
    }
}

impl DriverConnection for SqliteConnection {
    fn is_valid(&mut self, _timeout: Duration) -> bool {
        self.connection
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .is_ok()
    }

    fn check_statement(&mut self) -> Result<(), DriverError> {
        self.connection.prepare_cached("SELECT 1")?;
        Ok(())
    }

    fn prepare(&mut self, sql: &str) -> Result<(), DriverError> {
        self.connection.prepare_cached(sql)?;
        Ok(())
    }

    fn execute(&mut self, sql: &str, values: &[Value]) -> Result<usize, DriverError> {
        self.begin()?;
        let mut statement = self.connection.prepare_cached(sql)?;
        Ok(statement.execute(params_from_iter(values.iter()))?)
    }

    fn execute_batch(&mut self, sql: &str) -> Result<(), DriverError> {
        self.begin()?;
        self.connection.execute_batch(sql)?;
        Ok(())
    }

    fn query(&mut self, sql: &str, values: &[Value]) -> Result<Vec<Vec<RawValue>>, DriverError> {
        let mut statement = self.connection.prepare_cached(sql)?;
        let column_count = statement.column_count();
        let mut rows = statement.query(params_from_iter(values.iter()))?;

        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            let mut columns = Vec::with_capacity(column_count);
            for i in 0..column_count {
                columns.push(raw_value(row.get_ref(i)?));
            }
            result.push(columns);
        }
        Ok(result)
    }

    fn execute_returning_key(&mut self, sql: &str, values: &[Value]) -> Result<Option<i64>, DriverError> {
        let changed = self.execute(sql, values)?;
        if changed == 0 {
            return Ok(None);
        }
        Ok(Some(self.connection.last_insert_rowid()))
    }

    fn commit(&mut self) -> Result<(), DriverError> {
        if !self.connection.is_autocommit() {
            self.connection.execute_batch("COMMIT")?;
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), DriverError> {
        if !self.connection.is_autocommit() {
            self.connection.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }

    fn set_savepoint(&mut self, name: &str) -> Result<(), DriverError> {
        self.begin()?;
        self.connection.execute_batch(&format!("SAVEPOINT {}", name))?;
        Ok(())
    }

    fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), DriverError> {
        self.connection
            .execute_batch(&format!("ROLLBACK TO SAVEPOINT {}", name))?;
        Ok(())
    }

    fn release_savepoint(&mut self, name: &str) -> Result<(), DriverError> {
        self.connection
            .execute_batch(&format!("RELEASE SAVEPOINT {}", name))?;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        !self.connection.is_autocommit()
    }

    fn close(self: Box<Self>) -> Result<(), DriverError> {
        self.connection.close().map_err(|(_, error)| error.into())
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let output = match self {
            Value::Null(_) => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Value::Boolean(value) => ToSqlOutput::from(i64::from(*value)),
            Value::Int8(value) => ToSqlOutput::from(i64::from(*value)),
            Value::Int16(value) => ToSqlOutput::from(i64::from(*value)),
            Value::Int32(value) => ToSqlOutput::from(i64::from(*value)),
            Value::Int64(value) => ToSqlOutput::from(*value),
            Value::String(value) => ToSqlOutput::Borrowed(ValueRef::Text(value.as_bytes())),
            Value::Binary(value) => ToSqlOutput::Borrowed(ValueRef::Blob(value)),
            Value::Binary128(value) => ToSqlOutput::Borrowed(ValueRef::Blob(value)),
            Value::Binary256(value) => ToSqlOutput::Borrowed(ValueRef::Blob(value)),
            Value::Float32(value) => ToSqlOutput::from(f64::from(*value)),
            Value::Float64(value) => ToSqlOutput::from(*value),
        };
        Ok(output)
    }
}

fn raw_value(value: ValueRef<'_>) -> RawValue {
    match value {
        ValueRef::Null => RawValue::Null,
        ValueRef::Integer(value) => RawValue::Integer(value),
        ValueRef::Real(value) => RawValue::Real(value),
        ValueRef::Text(value) => RawValue::Text(String::from_utf8_lossy(value).into_owned()),
        ValueRef::Blob(value) => RawValue::Blob(value.to_vec()),
    }
}
