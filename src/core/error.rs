/// Database Error Module
///
/// This module defines the error taxonomy of the access layer. Construction
/// and rendering errors never touch the database; execution errors always carry
/// the failed operation together with the backend error as their source.
use crate::ast::LogicalType;
use crate::core::db::DriverError;
use crate::dialect::Dialect;
use thiserror::Error;

/// Comprehensive error type for the access layer.
///
/// The variants fall into four groups:
/// - Construction and rendering (`MalformedStatement`, `UnsupportedNode`,
///   `UnsupportedType`, `InvalidIdentifier`)
/// - Execution against a live connection (`Failed*`)
/// - Row recovery (`CorruptValue`, `CorruptNullValue`)
/// - Lifecycle and configuration
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// An AST invariant was violated while building a node
    #[error("Malformed statement: {0}")]
    MalformedStatement(String),

    /// The dialect has no rendering for the node in the position it was used
    #[error("The {dialect} dialect cannot render {node}")]
    UnsupportedNode { node: String, dialect: Dialect },

    /// The dialect cannot represent the logical type as requested
    #[error("The {dialect} dialect cannot represent {logical_type} {usage}")]
    UnsupportedType {
        logical_type: LogicalType,
        dialect: Dialect,
        usage: &'static str,
    },

    /// The identifier fails the dialect's pattern or length bound
    #[error("'{identifier}' is not a valid identifier for the {dialect} dialect")]
    InvalidIdentifier { identifier: String, dialect: Dialect },

    /// The connection could not be opened or stayed invalid after one replacement
    #[error("Could not establish a valid database connection: {0}")]
    FailedConnection(#[source] DriverError),

    #[error("Could not create a statement: {0}")]
    FailedStatementCreation(#[source] DriverError),

    #[error("Could not prepare the statement '{sql}': {source}")]
    FailedPreparedStatementCreation {
        sql: String,
        #[source]
        source: DriverError,
    },

    /// An update, insert or delete failed, including constraint violations
    #[error("Could not execute the update '{sql}': {source}")]
    FailedUpdateExecution {
        sql: String,
        #[source]
        source: DriverError,
    },

    #[error("Could not execute the query '{sql}': {source}")]
    FailedQueryExecution {
        sql: String,
        #[source]
        source: DriverError,
    },

    /// The insert went through but no key could be retrieved
    #[error("The statement '{sql}' did not generate a key")]
    FailedKeyGeneration {
        sql: String,
        #[source]
        source: Option<DriverError>,
    },

    /// The state of the transaction is undefined afterwards
    #[error("Could not commit the transaction: {0}")]
    FailedCommit(#[source] DriverError),

    #[error("Could not create a savepoint: {0}")]
    FailedSavepointCreation(#[source] DriverError),

    #[error("Could not roll back to the savepoint: {0}")]
    FailedSavepointRollback(#[source] DriverError),

    #[error("Could not close the connection: {0}")]
    FailedClosing(#[source] DriverError),

    /// A column had an unexpected type or the cursor ran past the last column
    #[error("Corrupt value: {0}")]
    CorruptValue(String),

    #[error("The value in column {column} may not be null but is null")]
    CorruptNullValue { column: usize },

    #[error("The database has not been initialized")]
    NotInitialized,

    #[error("The database has already been initialized")]
    AlreadyInitialized,

    #[error("The connection context has been closed")]
    ContextClosed,

    /// Configuration parsing and validation errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DatabaseError {
    /// The backend error underneath an execution failure, if there is one.
    pub fn driver_error(&self) -> Option<&DriverError> {
        match self {
            DatabaseError::FailedConnection(source)
            | DatabaseError::FailedStatementCreation(source)
            | DatabaseError::FailedCommit(source)
            | DatabaseError::FailedSavepointCreation(source)
            | DatabaseError::FailedSavepointRollback(source)
            | DatabaseError::FailedClosing(source) => Some(source),
            DatabaseError::FailedPreparedStatementCreation { source, .. }
            | DatabaseError::FailedUpdateExecution { source, .. }
            | DatabaseError::FailedQueryExecution { source, .. } => Some(source),
            DatabaseError::FailedKeyGeneration { source, .. } => source.as_ref(),
            _ => None,
        }
    }

    /// Whether the failure was caused by a violated table constraint.
    pub fn is_constraint_violation(&self) -> bool {
        self.driver_error()
            .map(DriverError::is_constraint_violation)
            .unwrap_or(false)
    }
}

/// Type alias for Result to use DatabaseError as the error type.
pub type Result<T> = std::result::Result<T, DatabaseError>;
