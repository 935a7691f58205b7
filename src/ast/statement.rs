//! Statement nodes and the column declarations they own.

use crate::ast::expression::{BinaryOperator, ColumnReference, Domain, Expression};
use crate::ast::types::{LogicalType, Value};
use crate::core::{DatabaseError, Result};
use crate::values::ValueCollector;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceOption {
    Restrict,
    Cascade,
    SetNull,
    NoAction,
}

impl ReferenceOption {
    pub fn sql(self) -> &'static str {
        match self {
            ReferenceOption::Restrict => "RESTRICT",
            ReferenceOption::Cascade => "CASCADE",
            ReferenceOption::SetNull => "SET NULL",
            ReferenceOption::NoAction => "NO ACTION",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyReference {
    table: String,
    column: String,
    on_delete: Option<ReferenceOption>,
    on_update: Option<ReferenceOption>,
}

impl ForeignKeyReference {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        ForeignKeyReference {
            table: table.into(),
            column: column.into(),
            on_delete: None,
            on_update: None,
        }
    }

    pub fn on_delete(mut self, option: ReferenceOption) -> Self {
        self.on_delete = Some(option);
        self
    }

    pub fn on_update(mut self, option: ReferenceOption) -> Self {
        self.on_update = Some(option);
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn delete_option(&self) -> Option<ReferenceOption> {
        self.on_delete
    }

    pub fn update_option(&self) -> Option<ReferenceOption> {
        self.on_update
    }
}

/// A boolean expression every row of a column has to satisfy.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckConstraint {
    expression: Expression,
}

impl CheckConstraint {
    pub fn new(expression: Expression) -> Result<Self> {
        match expression.domain() {
            Domain::Boolean | Domain::Any => Ok(CheckConstraint { expression }),
            other => Err(DatabaseError::MalformedStatement(format!(
                "a check constraint must be boolean, not {:?}",
                other
            ))),
        }
    }

    /// `((column % factor) = 0)`
    pub fn multiple_of(column: &str, factor: i64) -> Result<Self> {
        let modulo = Expression::binary(
            BinaryOperator::Modulo,
            Expression::column(column),
            Expression::integer(factor),
        )?;
        CheckConstraint::new(Expression::equal(modulo, Expression::integer(0))?)
    }

    pub fn positive(column: &str) -> Result<Self> {
        Self::compare_with_zero(column, BinaryOperator::Greater)
    }

    pub fn negative(column: &str) -> Result<Self> {
        Self::compare_with_zero(column, BinaryOperator::Less)
    }

    pub fn non_negative(column: &str) -> Result<Self> {
        Self::compare_with_zero(column, BinaryOperator::GreaterOrEqual)
    }

    fn compare_with_zero(column: &str, operator: BinaryOperator) -> Result<Self> {
        CheckConstraint::new(Expression::binary(
            operator,
            Expression::column(column),
            Expression::integer(0),
        )?)
    }

    pub fn expression(&self) -> &Expression {
        &self.expression
    }
}

/// The declaration of one column inside a `CREATE TABLE` statement.
///
/// Columns are nullable and carry no constraints until the builder methods
/// say otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDeclaration {
    name: String,
    logical_type: LogicalType,
    nullable: bool,
    primary_key: bool,
    auto_increment: bool,
    unique: bool,
    check: Option<CheckConstraint>,
    default: Option<Expression>,
    reference: Option<ForeignKeyReference>,
}

impl ColumnDeclaration {
    pub fn new(name: impl Into<String>, logical_type: LogicalType) -> Self {
        ColumnDeclaration {
            name: name.into(),
            logical_type,
            nullable: true,
            primary_key: false,
            auto_increment: false,
            unique: false,
            check: None,
            default: None,
            reference: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    /// Only valid together with [`ColumnDeclaration::primary_key`].
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn check(mut self, check: CheckConstraint) -> Self {
        self.check = Some(check);
        self
    }

    pub fn default_value(mut self, default: Expression) -> Self {
        self.default = Some(default);
        self
    }

    pub fn references(mut self, reference: ForeignKeyReference) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn logical_type(&self) -> LogicalType {
        self.logical_type
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn is_primary_key(&self) -> bool {
        self.primary_key
    }

    pub fn is_auto_increment(&self) -> bool {
        self.auto_increment
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    pub fn check_constraint(&self) -> Option<&CheckConstraint> {
        self.check.as_ref()
    }

    pub fn default(&self) -> Option<&Expression> {
        self.default.as_ref()
    }

    pub fn reference(&self) -> Option<&ForeignKeyReference> {
        self.reference.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateTableStatement {
    table_name: String,
    columns: Vec<ColumnDeclaration>,
    index: Option<Vec<String>>,
}

impl CreateTableStatement {
    pub fn new(table_name: impl Into<String>, columns: Vec<ColumnDeclaration>) -> Result<Self> {
        let table_name = table_name.into();
        if columns.is_empty() {
            return Err(DatabaseError::MalformedStatement(format!(
                "table {} declares no columns",
                table_name
            )));
        }

        let mut names = HashSet::new();
        for column in &columns {
            if !names.insert(column.name.to_lowercase()) {
                return Err(DatabaseError::MalformedStatement(format!(
                    "column {} is declared twice in table {}",
                    column.name, table_name
                )));
            }
            if column.auto_increment && !column.primary_key {
                return Err(DatabaseError::MalformedStatement(format!(
                    "column {} auto-increments without being the primary key",
                    column.name
                )));
            }
        }
        if columns.iter().filter(|c| c.primary_key).count() > 1 {
            return Err(DatabaseError::MalformedStatement(format!(
                "table {} declares more than one primary key column",
                table_name
            )));
        }

        Ok(CreateTableStatement {
            table_name,
            columns,
            index: None,
        })
    }

    /// Adds an index over the given columns, all of which must be declared.
    pub fn with_index(mut self, columns: Vec<String>) -> Result<Self> {
        if columns.is_empty() {
            return Err(DatabaseError::MalformedStatement(
                "an index needs at least one column".to_string(),
            ));
        }
        if let Some(missing) = columns
            .iter()
            .find(|name| !self.columns.iter().any(|c| c.name.eq_ignore_ascii_case(name)))
        {
            return Err(DatabaseError::MalformedStatement(format!(
                "the indexed column {} is not declared in table {}",
                missing, self.table_name
            )));
        }
        self.index = Some(columns);
        Ok(self)
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn columns(&self) -> &[ColumnDeclaration] {
        &self.columns
    }

    pub fn index(&self) -> Option<&[String]> {
        self.index.as_deref()
    }

    /// The primary key column names, in declaration order.
    pub fn primary_key_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.as_str())
            .collect()
    }
}

/// What an insert does when it collides with an existing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictResolution {
    #[default]
    Abort,
    Ignore,
    Replace,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    table_name: String,
    column_names: Vec<String>,
    values: Vec<Expression>,
    conflict: ConflictResolution,
}

impl InsertStatement {
    pub fn new(
        table_name: impl Into<String>,
        column_names: Vec<String>,
        values: Vec<Expression>,
    ) -> Result<Self> {
        let table_name = table_name.into();
        if column_names.is_empty() {
            return Err(DatabaseError::MalformedStatement(format!(
                "the insert into {} names no columns",
                table_name
            )));
        }
        if column_names.len() != values.len() {
            return Err(DatabaseError::MalformedStatement(format!(
                "the insert into {} names {} columns but supplies {} values",
                table_name,
                column_names.len(),
                values.len()
            )));
        }
        Ok(InsertStatement {
            table_name,
            column_names,
            values,
            conflict: ConflictResolution::Abort,
        })
    }

    /// Builds an insert from the ordered field/value pairs of a converted object.
    pub fn from_row(table_name: impl Into<String>, row: Vec<(String, Value)>) -> Result<Self> {
        let (column_names, values): (Vec<String>, Vec<Expression>) = row
            .into_iter()
            .map(|(name, value)| (name, Expression::Bound(value)))
            .unzip();
        InsertStatement::new(table_name, column_names, values)
    }

    pub fn with_conflict(mut self, conflict: ConflictResolution) -> Self {
        self.conflict = conflict;
        self
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    pub fn values(&self) -> &[Expression] {
        &self.values
    }

    pub fn conflict(&self) -> ConflictResolution {
        self.conflict
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderingDirection {
    Ascending,
    Descending,
}

impl OrderingDirection {
    pub fn sql(self) -> &'static str {
        match self {
            OrderingDirection::Ascending => "ASC",
            OrderingDirection::Descending => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderingTerm {
    column: ColumnReference,
    direction: Option<OrderingDirection>,
}

impl OrderingTerm {
    pub fn new(column: ColumnReference, direction: Option<OrderingDirection>) -> Self {
        OrderingTerm { column, direction }
    }

    pub fn ascending(column: impl Into<String>) -> Self {
        OrderingTerm::new(ColumnReference::new(column), Some(OrderingDirection::Ascending))
    }

    pub fn descending(column: impl Into<String>) -> Self {
        OrderingTerm::new(ColumnReference::new(column), Some(OrderingDirection::Descending))
    }

    pub fn column(&self) -> &ColumnReference {
        &self.column
    }

    pub fn direction(&self) -> Option<OrderingDirection> {
        self.direction
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResultColumns {
    All,
    Expressions(Vec<Expression>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    columns: ResultColumns,
    table_name: String,
    filter: Option<Expression>,
    order_by: Vec<OrderingTerm>,
    limit: Option<u64>,
}

impl SelectStatement {
    pub fn new(table_name: impl Into<String>, columns: Vec<Expression>) -> Result<Self> {
        let table_name = table_name.into();
        if columns.is_empty() {
            return Err(DatabaseError::MalformedStatement(format!(
                "the selection from {} has no result columns",
                table_name
            )));
        }
        Ok(SelectStatement {
            columns: ResultColumns::Expressions(columns),
            table_name,
            filter: None,
            order_by: Vec::new(),
            limit: None,
        })
    }

    /// `SELECT * FROM table`
    pub fn all(table_name: impl Into<String>) -> Self {
        SelectStatement {
            columns: ResultColumns::All,
            table_name: table_name.into(),
            filter: None,
            order_by: Vec::new(),
            limit: None,
        }
    }

    pub fn filter(mut self, filter: Expression) -> Result<Self> {
        self.filter = Some(boolean_filter(filter)?);
        Ok(self)
    }

    pub fn order_by(mut self, term: OrderingTerm) -> Self {
        self.order_by.push(term);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn columns(&self) -> &ResultColumns {
        &self.columns
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn filter_expression(&self) -> Option<&Expression> {
        self.filter.as_ref()
    }

    pub fn ordering_terms(&self) -> &[OrderingTerm] {
        &self.order_by
    }

    pub fn row_limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn store_values(&self, collector: &mut dyn ValueCollector) {
        if let ResultColumns::Expressions(columns) = &self.columns {
            for column in columns {
                column.store_values(collector);
            }
        }
        if let Some(filter) = &self.filter {
            filter.store_values(collector);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStatement {
    table_name: String,
    filter: Option<Expression>,
}

impl DeleteStatement {
    pub fn new(table_name: impl Into<String>) -> Self {
        DeleteStatement {
            table_name: table_name.into(),
            filter: None,
        }
    }

    /// `DELETE FROM table WHERE (column < cutoff)`
    pub fn older_than(table_name: impl Into<String>, column: &str, cutoff: i64) -> Result<Self> {
        DeleteStatement::new(table_name).filter(Expression::binary(
            BinaryOperator::Less,
            Expression::column(column),
            Expression::integer(cutoff),
        )?)
    }

    pub fn filter(mut self, filter: Expression) -> Result<Self> {
        self.filter = Some(boolean_filter(filter)?);
        Ok(self)
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn filter_expression(&self) -> Option<&Expression> {
        self.filter.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropTableStatement {
    table_name: String,
}

impl DropTableStatement {
    pub fn new(table_name: impl Into<String>) -> Self {
        DropTableStatement {
            table_name: table_name.into(),
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }
}

/// The root of everything a dialect can render.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    CreateTable(CreateTableStatement),
    Insert(InsertStatement),
    Select(SelectStatement),
    Delete(DeleteStatement),
    DropTable(DropTableStatement),
}

impl Statement {
    /// Collects bound values in placeholder order. Table definitions are
    /// always rendered with inline literals and collect nothing.
    pub fn store_values(&self, collector: &mut dyn ValueCollector) {
        match self {
            Statement::CreateTable(_) | Statement::DropTable(_) => {}
            Statement::Insert(insert) => {
                for value in &insert.values {
                    value.store_values(collector);
                }
            }
            Statement::Select(select) => select.store_values(collector),
            Statement::Delete(delete) => {
                if let Some(filter) = &delete.filter {
                    filter.store_values(collector);
                }
            }
        }
    }
}

impl From<CreateTableStatement> for Statement {
    fn from(statement: CreateTableStatement) -> Self {
        Statement::CreateTable(statement)
    }
}

impl From<InsertStatement> for Statement {
    fn from(statement: InsertStatement) -> Self {
        Statement::Insert(statement)
    }
}

impl From<SelectStatement> for Statement {
    fn from(statement: SelectStatement) -> Self {
        Statement::Select(statement)
    }
}

impl From<DeleteStatement> for Statement {
    fn from(statement: DeleteStatement) -> Self {
        Statement::Delete(statement)
    }
}

impl From<DropTableStatement> for Statement {
    fn from(statement: DropTableStatement) -> Self {
        Statement::DropTable(statement)
    }
}

fn boolean_filter(filter: Expression) -> Result<Expression> {
    match filter.domain() {
        Domain::Boolean | Domain::Any => Ok(filter),
        other => Err(DatabaseError::MalformedStatement(format!(
            "a filter must be boolean, not {:?}",
            other
        ))),
    }
}
