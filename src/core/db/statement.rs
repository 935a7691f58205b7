/// Statement Module
///
/// Plain and prepared statements borrow a locked connection context for
/// their whole lifetime, so nothing can be executed on a context that is not
/// locked and no statement outlives the context that created it.
use crate::ast::Value;
use crate::core::db::connection::ConnectionContext;
use crate::core::{DatabaseError, Result};
use crate::values::{RowCursor, ValueCollector};

/// A statement that takes its SQL text at execution time.
#[derive(Debug)]
pub struct Statement<'a> {
    context: &'a mut ConnectionContext,
}

impl<'a> Statement<'a> {
    pub(crate) fn new(context: &'a mut ConnectionContext) -> Self {
        Statement { context }
    }

    /// Executes an update, insert, delete or DDL statement and returns the
    /// number of affected rows.
    pub fn execute_update(&mut self, sql: &str) -> Result<usize> {
        self.context
            .connection()?
            .execute(sql, &[])
            .map_err(|source| DatabaseError::FailedUpdateExecution {
                sql: sql.to_string(),
                source,
            })
    }

    /// Executes several `;`-separated statements in order.
    pub fn execute_batch(&mut self, sql: &str) -> Result<()> {
        self.context
            .connection()?
            .execute_batch(sql)
            .map_err(|source| DatabaseError::FailedUpdateExecution {
                sql: sql.to_string(),
                source,
            })
    }

    pub fn execute_query(&mut self, sql: &str) -> Result<Vec<RowCursor>> {
        query(self.context, sql, &[])
    }

    pub fn execute_insert(&mut self, sql: &str) -> Result<i64> {
        self.context.execute_insert(sql, &[])
    }
}

/// A statement compiled up front whose placeholders are bound in order.
#[derive(Debug)]
pub struct PreparedStatement<'a> {
    context: &'a mut ConnectionContext,
    sql: String,
    values: Vec<Value>,
}

impl<'a> PreparedStatement<'a> {
    pub(crate) fn new(context: &'a mut ConnectionContext, sql: &str) -> Self {
        PreparedStatement {
            context,
            sql: sql.to_string(),
            values: Vec::new(),
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Binds the next placeholder.
    pub fn bind(&mut self, value: impl Into<Value>) -> &mut Self {
        self.values.push(value.into());
        self
    }

    pub fn bind_all(&mut self, values: impl IntoIterator<Item = Value>) -> &mut Self {
        self.values.extend(values);
        self
    }

    pub fn bound_values(&self) -> &[Value] {
        &self.values
    }

    /// Forgets the bound values so that the statement can be run again.
    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn execute_update(&mut self) -> Result<usize> {
        let sql = &self.sql;
        self.context
            .connection()?
            .execute(sql, &self.values)
            .map_err(|source| DatabaseError::FailedUpdateExecution {
                sql: sql.clone(),
                source,
            })
    }

    pub fn execute_query(&mut self) -> Result<Vec<RowCursor>> {
        query(self.context, &self.sql, &self.values)
    }

    pub fn execute_insert(&mut self) -> Result<i64> {
        self.context.execute_insert(&self.sql, &self.values)
    }
}

impl ValueCollector for PreparedStatement<'_> {
    fn collect(&mut self, value: Value) {
        self.values.push(value);
    }
}

fn query(context: &mut ConnectionContext, sql: &str, values: &[Value]) -> Result<Vec<RowCursor>> {
    let rows = context
        .connection()?
        .query(sql, values)
        .map_err(|source| DatabaseError::FailedQueryExecution {
            sql: sql.to_string(),
            source,
        })?;
    Ok(rows.into_iter().map(RowCursor::new).collect())
}
