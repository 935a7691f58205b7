//! SQL dialects.
//!
//! A [`Dialect`] is a closed set of backends, each with its own constant table:
//! identifier rules, the column syntax of every logical type, literal and
//! function spellings, upsert and index syntax, and the transactional
//! capabilities the connection manager relies on. The unparser in
//! [`unparser`] turns AST nodes into text using these tables; the rule and
//! index builders live in [`rules`].

pub mod rules;
pub mod unparser;

use crate::ast::{ConflictResolution, LogicalType};
use crate::core::{DatabaseError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

static IDENTIFIER_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("the identifier pattern is a valid regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Sqlite,
    /// The SQLite engine bundled with embedded platforms, which lacks savepoints
    /// and stores every integer width in a single affinity.
    Embedded,
    MySql,
    PostgreSql,
}

/// How an insert hands back the key the backend generated for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRetrieval {
    /// A follow-up query on the same connection
    LastInsertId(&'static str),
    /// The statement's own generated-keys channel
    GeneratedKeys,
}

impl Dialect {
    pub const ALL: [Dialect; 4] = [
        Dialect::Sqlite,
        Dialect::Embedded,
        Dialect::MySql,
        Dialect::PostgreSql,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Dialect::Sqlite => "SQLite",
            Dialect::Embedded => "Embedded",
            Dialect::MySql => "MySQL",
            Dialect::PostgreSql => "PostgreSQL",
        }
    }

    /// SQLite and the embedded engine share most of their syntax.
    pub fn is_sqlite_class(self) -> bool {
        matches!(self, Dialect::Sqlite | Dialect::Embedded)
    }

    /// `None` means the backend imposes no practical bound.
    pub fn max_identifier_length(self) -> Option<usize> {
        match self {
            Dialect::Sqlite | Dialect::Embedded => None,
            Dialect::MySql => Some(64),
            Dialect::PostgreSql => Some(63),
        }
    }

    pub fn is_valid_identifier(self, identifier: &str) -> bool {
        IDENTIFIER_PATTERN.is_match(identifier)
            && self
                .max_identifier_length()
                .map_or(true, |max| identifier.len() <= max)
    }

    pub fn validate_identifier(self, identifier: &str) -> Result<()> {
        if self.is_valid_identifier(identifier) {
            Ok(())
        } else {
            Err(DatabaseError::InvalidIdentifier {
                identifier: identifier.to_string(),
                dialect: self,
            })
        }
    }

    /// The complete declaration of an auto-incrementing 64-bit key column.
    pub fn primary_key_clause(self) -> &'static str {
        match self {
            Dialect::Sqlite | Dialect::Embedded => "INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT",
            Dialect::MySql => "BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY",
            Dialect::PostgreSql => "BIGSERIAL PRIMARY KEY",
        }
    }

    pub fn column_type(self, logical_type: LogicalType) -> &'static str {
        match self {
            Dialect::Sqlite => match logical_type {
                LogicalType::Boolean => "BOOLEAN",
                LogicalType::Int8 => "TINYINT",
                LogicalType::Int16 => "SMALLINT",
                LogicalType::Int32 => "INTEGER",
                LogicalType::Int64 => "BIGINT",
                LogicalType::String => "TEXT",
                LogicalType::Binary | LogicalType::Binary128 | LogicalType::Binary256 => "BLOB",
                LogicalType::Float32 | LogicalType::Float64 => "REAL",
            },
            Dialect::Embedded => match logical_type {
                LogicalType::Boolean
                | LogicalType::Int8
                | LogicalType::Int16
                | LogicalType::Int32
                | LogicalType::Int64 => "INTEGER",
                LogicalType::String => "TEXT",
                LogicalType::Binary | LogicalType::Binary128 | LogicalType::Binary256 => "BLOB",
                LogicalType::Float32 | LogicalType::Float64 => "REAL",
            },
            Dialect::MySql => match logical_type {
                LogicalType::Boolean => "BOOLEAN",
                LogicalType::Int8 => "TINYINT",
                LogicalType::Int16 => "SMALLINT",
                LogicalType::Int32 => "INT",
                LogicalType::Int64 => "BIGINT",
                LogicalType::String => "TEXT",
                LogicalType::Binary => "LONGBLOB",
                LogicalType::Binary128 => "BINARY(16)",
                LogicalType::Binary256 => "BINARY(32)",
                LogicalType::Float32 => "FLOAT",
                LogicalType::Float64 => "DOUBLE",
            },
            // PostgreSQL has no fixed-width byte string, so every binary is BYTEA
            Dialect::PostgreSql => match logical_type {
                LogicalType::Boolean => "BOOLEAN",
                LogicalType::Int8 | LogicalType::Int16 => "SMALLINT",
                LogicalType::Int32 => "INTEGER",
                LogicalType::Int64 => "BIGINT",
                LogicalType::String => "TEXT",
                LogicalType::Binary | LogicalType::Binary128 | LogicalType::Binary256 => "BYTEA",
                LogicalType::Float32 => "FLOAT4",
                LogicalType::Float64 => "FLOAT8",
            },
        }
    }

    pub fn boolean_literal(self, value: bool) -> &'static str {
        match (self.is_sqlite_class(), value) {
            (true, true) => "1",
            (true, false) => "0",
            (false, true) => "true",
            (false, false) => "false",
        }
    }

    pub fn greatest_function(self) -> &'static str {
        if self.is_sqlite_class() {
            "MAX"
        } else {
            "GREATEST"
        }
    }

    pub fn least_function(self) -> &'static str {
        if self.is_sqlite_class() {
            "MIN"
        } else {
            "LEAST"
        }
    }

    /// An expression for the current time in milliseconds since the epoch.
    pub fn current_time(self) -> &'static str {
        match self {
            Dialect::Sqlite | Dialect::Embedded => {
                "CAST((JULIANDAY('NOW') - 2440587.5)*86400000 AS INTEGER)"
            }
            Dialect::MySql => "UNIX_TIMESTAMP(SYSDATE()) * 1000 + MICROSECOND(SYSDATE(3)) DIV 1000",
            Dialect::PostgreSql => "ROUND(EXTRACT(EPOCH FROM CLOCK_TIMESTAMP()) * 1000)",
        }
    }

    /// The statement head up to and including `INTO`. PostgreSQL resolves
    /// conflicts through rule objects, so its inserts always look plain.
    pub fn insert_prefix(self, conflict: ConflictResolution) -> &'static str {
        match (self, conflict) {
            (_, ConflictResolution::Abort) => "INSERT INTO",
            (Dialect::Sqlite | Dialect::Embedded, ConflictResolution::Ignore) => {
                "INSERT OR IGNORE INTO"
            }
            (Dialect::MySql, ConflictResolution::Ignore) => "INSERT IGNORE INTO",
            (Dialect::PostgreSql, _) => "INSERT INTO",
            (_, ConflictResolution::Replace) => "REPLACE INTO",
        }
    }

    /// Whether all contexts have to contend for one process-wide lock.
    pub fn requires_serialized_access(self) -> bool {
        self.is_sqlite_class()
    }

    pub fn supports_savepoints(self) -> bool {
        !matches!(self, Dialect::Embedded)
    }

    pub fn key_retrieval(self) -> KeyRetrieval {
        match self {
            Dialect::Sqlite => KeyRetrieval::LastInsertId("SELECT last_insert_rowid()"),
            Dialect::Embedded | Dialect::MySql | Dialect::PostgreSql => KeyRetrieval::GeneratedKeys,
        }
    }

    pub fn default_port(self) -> Option<u16> {
        match self {
            Dialect::Sqlite | Dialect::Embedded => None,
            Dialect::MySql => Some(3306),
            Dialect::PostgreSql => Some(5432),
        }
    }

    /// The statement creating the unit's schema, if the backend has schemas.
    pub fn create_schema(self, unit: &Unit) -> Result<Option<String>> {
        match unit.name() {
            Some(name) if !self.is_sqlite_class() => {
                self.validate_identifier(name)?;
                Ok(Some(format!("CREATE SCHEMA IF NOT EXISTS {}", name)))
            }
            _ => Ok(None),
        }
    }

    /// The table name as it has to appear in statements rendered for `unit`.
    pub fn qualify(self, table: &str, unit: &Unit) -> Result<String> {
        self.validate_identifier(table)?;
        let qualified = match unit.name() {
            None => table.to_string(),
            Some(name) if self.is_sqlite_class() => {
                let prefixed = format!("{}_{}", name, table);
                self.validate_identifier(&prefixed)?;
                prefixed
            }
            Some(name) => {
                self.validate_identifier(name)?;
                format!("{}.{}", name, table)
            }
        };
        Ok(qualified)
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The schema a statement is rendered under.
///
/// The default unit leaves table names unqualified. Backends with schemas
/// place a named unit's tables in a schema of that name; SQLite-class
/// backends prefix the table name instead.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Unit {
    name: Option<String>,
}

impl Unit {
    pub fn named(name: impl Into<String>) -> Self {
        Unit {
            name: Some(name.into()),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_default(&self) -> bool {
        self.name.is_none()
    }
}
