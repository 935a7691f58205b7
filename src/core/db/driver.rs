/// Driver Seam Module
///
/// This module defines the contract between the connection manager and the
/// storage backend. The manager never talks to a database library directly;
/// it opens connections through a [`Driver`] and issues every statement,
/// commit and savepoint through the returned [`DriverConnection`].
use crate::ast::Value;
use rusqlite::ErrorCode;
use std::fmt::Debug;
use std::time::Duration;
use thiserror::Error;

/// Errors reported by a storage backend.
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Any other backend, described by its own message
    #[error("{0}")]
    Backend(String),

    /// A constraint of the backend rejected the statement
    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("The connection is closed")]
    Closed,

    #[error("The connection failed its validity probe")]
    Invalid,
}

impl DriverError {
    /// Whether the backend refused the statement because of a table constraint
    /// rather than because of a connectivity or syntax problem.
    pub fn is_constraint_violation(&self) -> bool {
        match self {
            DriverError::Sqlite(rusqlite::Error::SqliteFailure(error, _)) => {
                error.code == ErrorCode::ConstraintViolation
            }
            DriverError::Constraint(_) => true,
            _ => false,
        }
    }
}

/// A column value exactly as the backend stored it.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

/// Opens connections to one database.
pub trait Driver: Send + Sync + Debug {
    fn connect(&self) -> Result<Box<dyn DriverConnection>, DriverError>;
}

/// One live connection, exclusively owned by a connection context.
///
/// Connections never auto-commit: the first statement after a commit or
/// rollback starts a new transaction, which stays open until the manager
/// commits or rolls it back.
pub trait DriverConnection: Send {
    /// A lightweight liveness probe.
    fn is_valid(&mut self, timeout: Duration) -> bool;

    /// Whether the connection can produce statements at all.
    fn check_statement(&mut self) -> Result<(), DriverError>;

    /// Compiles `sql` without executing it.
    fn prepare(&mut self, sql: &str) -> Result<(), DriverError>;

    /// Executes `sql` with positional parameters and returns the affected row count.
    fn execute(&mut self, sql: &str, values: &[Value]) -> Result<usize, DriverError>;

    /// Executes several statements without parameters.
    fn execute_batch(&mut self, sql: &str) -> Result<(), DriverError>;

    fn query(&mut self, sql: &str, values: &[Value]) -> Result<Vec<Vec<RawValue>>, DriverError>;

    /// Executes an insert and returns the key it generated, if any.
    fn execute_returning_key(&mut self, sql: &str, values: &[Value]) -> Result<Option<i64>, DriverError>;

    fn commit(&mut self) -> Result<(), DriverError>;

    fn rollback(&mut self) -> Result<(), DriverError>;

    fn set_savepoint(&mut self, name: &str) -> Result<(), DriverError>;

    fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), DriverError>;

    fn release_savepoint(&mut self, name: &str) -> Result<(), DriverError>;

    /// Whether uncommitted work is pending on the connection.
    fn in_transaction(&self) -> bool;

    fn close(self: Box<Self>) -> Result<(), DriverError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::ffi;

    #[test]
    fn test_constraint_violations_are_recognized() {
        let failure = rusqlite::Error::SqliteFailure(
            ffi::Error::new(ffi::SQLITE_CONSTRAINT_CHECK),
            Some("CHECK constraint failed: sevens".to_string()),
        );
        assert!(DriverError::from(failure).is_constraint_violation());
        assert!(DriverError::Constraint("duplicate key".to_string()).is_constraint_violation());

        let busy = rusqlite::Error::SqliteFailure(ffi::Error::new(ffi::SQLITE_BUSY), None);
        assert!(!DriverError::from(busy).is_constraint_violation());
        assert!(!DriverError::Invalid.is_constraint_violation());
    }
}
