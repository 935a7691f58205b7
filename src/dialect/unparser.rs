//! Rendering of AST nodes into dialect-specific SQL text.
//!
//! There are two entry points. [`Dialect::unparse`] writes every literal
//! inline, which is what table definitions need. [`Dialect::render`] writes a
//! positional `?` placeholder for every literal of a data statement and hands
//! back the values in placeholder order, ready to be bound.

use crate::ast::{
    ColumnDeclaration, ColumnReference, CreateTableStatement, DeleteStatement, Expression,
    ForeignKeyReference, InsertStatement, Literal, LogicalType, OrderingTerm, ResultColumns,
    SelectStatement, Statement, Value, VariadicOperator,
};
use crate::core::{DatabaseError, Result};
use crate::dialect::{Dialect, Unit};
use std::fmt::Write;

/// Where an expression is being rendered, which restricts what it may contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    Statement,
    Check,
    Default,
}

struct Unparser<'a> {
    dialect: Dialect,
    unit: &'a Unit,
    parameterized: bool,
}

impl<'a> Unparser<'a> {
    fn statement(&self, statement: &Statement, out: &mut String) -> Result<()> {
        match statement {
            Statement::CreateTable(create) => self.inline().create_table(create, out),
            Statement::Insert(insert) => self.insert(insert, out),
            Statement::Select(select) => self.select(select, out),
            Statement::Delete(delete) => self.delete(delete, out),
            Statement::DropTable(drop) => {
                let table = self.dialect.qualify(drop.table_name(), self.unit)?;
                write!(out, "DROP TABLE IF EXISTS {}", table).map_err(format_error)
            }
        }
    }

    /// Table definitions never carry placeholders.
    fn inline(&self) -> Unparser<'a> {
        Unparser {
            dialect: self.dialect,
            unit: self.unit,
            parameterized: false,
        }
    }

    fn create_table(&self, create: &CreateTableStatement, out: &mut String) -> Result<()> {
        let table = self.dialect.qualify(create.table_name(), self.unit)?;
        write!(out, "CREATE TABLE IF NOT EXISTS {} (", table).map_err(format_error)?;
        for (i, column) in create.columns().iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            self.column_declaration(column, out)?;
        }
        if let (Dialect::MySql, Some(index)) = (self.dialect, create.index()) {
            write!(out, ", INDEX({})", self.column_list(index)?).map_err(format_error)?;
        }
        out.push(')');
        Ok(())
    }

    fn column_declaration(&self, column: &ColumnDeclaration, out: &mut String) -> Result<()> {
        self.dialect.validate_identifier(column.name())?;
        out.push_str(column.name());
        out.push(' ');

        if column.is_auto_increment() {
            if !matches!(column.logical_type(), LogicalType::Int32 | LogicalType::Int64) {
                return Err(DatabaseError::UnsupportedType {
                    logical_type: column.logical_type(),
                    dialect: self.dialect,
                    usage: "as an auto-incrementing key",
                });
            }
            out.push_str(self.dialect.primary_key_clause());
            return Ok(());
        }

        out.push_str(self.dialect.column_type(column.logical_type()));
        if !column.is_nullable() {
            out.push_str(" NOT NULL");
        }
        if column.is_primary_key() {
            out.push_str(" PRIMARY KEY");
        }
        if column.is_unique() {
            out.push_str(" UNIQUE");
        }
        if let Some(check) = column.check_constraint() {
            out.push_str(" CHECK (");
            self.expression(check.expression(), Position::Check, out)?;
            out.push(')');
        }
        if let Some(default) = column.default() {
            out.push_str(" DEFAULT ");
            self.expression(default, Position::Default, out)?;
        }
        if let Some(reference) = column.reference() {
            self.reference(reference, out)?;
        }
        Ok(())
    }

    fn reference(&self, reference: &ForeignKeyReference, out: &mut String) -> Result<()> {
        let table = self.dialect.qualify(reference.table(), self.unit)?;
        self.dialect.validate_identifier(reference.column())?;
        write!(out, " REFERENCES {} ({})", table, reference.column()).map_err(format_error)?;
        if let Some(option) = reference.delete_option() {
            write!(out, " ON DELETE {}", option.sql()).map_err(format_error)?;
        }
        if let Some(option) = reference.update_option() {
            write!(out, " ON UPDATE {}", option.sql()).map_err(format_error)?;
        }
        Ok(())
    }

    fn insert(&self, insert: &InsertStatement, out: &mut String) -> Result<()> {
        let table = self.dialect.qualify(insert.table_name(), self.unit)?;
        write!(
            out,
            "{} {} ({}) VALUES (",
            self.dialect.insert_prefix(insert.conflict()),
            table,
            self.column_list(insert.column_names())?
        )
        .map_err(format_error)?;
        for (i, value) in insert.values().iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            self.expression(value, Position::Statement, out)?;
        }
        out.push(')');
        Ok(())
    }

    fn select(&self, select: &SelectStatement, out: &mut String) -> Result<()> {
        out.push_str("SELECT ");
        match select.columns() {
            ResultColumns::All => out.push('*'),
            ResultColumns::Expressions(columns) => {
                for (i, column) in columns.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.expression(column, Position::Statement, out)?;
                }
            }
        }
        let table = self.dialect.qualify(select.table_name(), self.unit)?;
        write!(out, " FROM {}", table).map_err(format_error)?;
        if let Some(filter) = select.filter_expression() {
            out.push_str(" WHERE ");
            self.expression(filter, Position::Statement, out)?;
        }
        if !select.ordering_terms().is_empty() {
            out.push_str(" ORDER BY ");
            for (i, term) in select.ordering_terms().iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                self.ordering_term(term, out)?;
            }
        }
        if let Some(limit) = select.row_limit() {
            write!(out, " LIMIT {}", limit).map_err(format_error)?;
        }
        Ok(())
    }

    fn ordering_term(&self, term: &OrderingTerm, out: &mut String) -> Result<()> {
        self.column_reference(term.column(), out)?;
        if let Some(direction) = term.direction() {
            out.push(' ');
            out.push_str(direction.sql());
        }
        Ok(())
    }

    fn delete(&self, delete: &DeleteStatement, out: &mut String) -> Result<()> {
        let table = self.dialect.qualify(delete.table_name(), self.unit)?;
        write!(out, "DELETE FROM {}", table).map_err(format_error)?;
        if let Some(filter) = delete.filter_expression() {
            out.push_str(" WHERE ");
            self.expression(filter, Position::Statement, out)?;
        }
        Ok(())
    }

    fn expression(&self, expression: &Expression, position: Position, out: &mut String) -> Result<()> {
        match expression {
            Expression::Literal(literal) => {
                if self.parameterized {
                    out.push('?');
                } else {
                    self.literal(literal, out)?;
                }
            }
            Expression::Bound(value) => {
                if !self.parameterized {
                    return Err(self.unsupported(format!(
                        "a bound {} value outside a parameterized statement",
                        value.logical_type()
                    )));
                }
                out.push('?');
            }
            Expression::Column(column) => {
                if position == Position::Default {
                    return Err(self.unsupported(format!(
                        "the column reference {} in a default value",
                        column.name()
                    )));
                }
                self.column_reference(column, out)?;
            }
            Expression::Unary(unary) => {
                out.push_str(unary.operator().symbol());
                out.push('(');
                self.expression(unary.operand(), position, out)?;
                out.push(')');
            }
            Expression::Binary(binary) => {
                out.push('(');
                self.expression(binary.left(), position, out)?;
                write!(out, " {} ", binary.operator().symbol()).map_err(format_error)?;
                self.expression(binary.right(), position, out)?;
                out.push(')');
            }
            Expression::Variadic(variadic) => {
                let (open, separator) = match (variadic.operator(), self.dialect) {
                    (VariadicOperator::Greatest, dialect) => (dialect.greatest_function(), ", "),
                    (VariadicOperator::Least, dialect) => (dialect.least_function(), ", "),
                    (VariadicOperator::Coalesce, _) => ("COALESCE", ", "),
                    (VariadicOperator::Concat, Dialect::MySql) => ("CONCAT", ", "),
                    (VariadicOperator::Concat, _) => ("", " || "),
                };
                out.push_str(open);
                out.push('(');
                for (i, operand) in variadic.operands().iter().enumerate() {
                    if i > 0 {
                        out.push_str(separator);
                    }
                    self.expression(operand, position, out)?;
                }
                out.push(')');
            }
            Expression::CurrentTime => {
                out.push('(');
                out.push_str(self.dialect.current_time());
                out.push(')');
            }
            Expression::Exists(selection) => {
                if position != Position::Statement {
                    return Err(self.unsupported("a subquery inside a table definition".to_string()));
                }
                out.push_str("EXISTS (");
                self.select(selection, out)?;
                out.push(')');
            }
        }
        Ok(())
    }

    fn literal(&self, literal: &Literal, out: &mut String) -> Result<()> {
        match literal {
            Literal::Boolean(value) => out.push_str(self.dialect.boolean_literal(*value)),
            Literal::Integer(value) => out.push_str(&value.to_string()),
            Literal::Float(value) if !value.is_finite() => {
                return Err(self.unsupported(format!("the non-finite float literal {}", value)));
            }
            Literal::Float(value) => out.push_str(&format!("{:?}", value)),
            Literal::String(value) => {
                out.push('\'');
                out.push_str(&value.replace('\'', "''"));
                out.push('\'');
            }
        }
        Ok(())
    }

    fn column_reference(&self, column: &ColumnReference, out: &mut String) -> Result<()> {
        self.dialect.validate_identifier(column.name())?;
        if let Some(table) = column.table() {
            out.push_str(&self.dialect.qualify(table, self.unit)?);
            out.push('.');
        }
        out.push_str(column.name());
        Ok(())
    }

    fn column_list(&self, columns: &[String]) -> Result<String> {
        for column in columns {
            self.dialect.validate_identifier(column)?;
        }
        Ok(columns.join(", "))
    }

    fn unsupported(&self, node: String) -> DatabaseError {
        DatabaseError::UnsupportedNode {
            node,
            dialect: self.dialect,
        }
    }
}

fn format_error(error: std::fmt::Error) -> DatabaseError {
    DatabaseError::MalformedStatement(format!("could not write the statement: {}", error))
}

impl Dialect {
    /// Appends the statement to `out` with every literal written inline.
    pub fn unparse(self, statement: &Statement, unit: &Unit, out: &mut String) -> Result<()> {
        let unparser = Unparser {
            dialect: self,
            unit,
            parameterized: false,
        };
        unparser.statement(statement, out)
    }

    /// Renders the statement with positional placeholders and returns the
    /// values to bind to them, in order.
    pub fn render(self, statement: &Statement, unit: &Unit) -> Result<(String, Vec<Value>)> {
        let unparser = Unparser {
            dialect: self,
            unit,
            parameterized: true,
        };
        let mut sql = String::new();
        unparser.statement(statement, &mut sql)?;

        let mut values: Vec<Value> = Vec::new();
        statement.store_values(&mut values);
        Ok((sql, values))
    }

    /// Every statement needed to create the table under `unit`, in execution
    /// order: the schema, the table itself and its index.
    pub fn render_create_table_script(
        self,
        create: &CreateTableStatement,
        unit: &Unit,
    ) -> Result<Vec<String>> {
        let mut script = Vec::new();
        if let Some(schema) = self.create_schema(unit)? {
            script.push(schema);
        }
        let mut table = String::new();
        self.unparse(&Statement::CreateTable(create.clone()), unit, &mut table)?;
        script.push(table);
        if let Some(index) = self.create_index(create, unit)? {
            script.push(index);
        }
        Ok(script)
    }
}
