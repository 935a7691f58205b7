//! Expression nodes.
//!
//! Expressions are immutable once built. The compound constructors check the
//! operand domains and the non-emptiness of variadic operand lists, so a node
//! that exists is structurally sound and rendering never has to re-validate it.

use crate::ast::statement::SelectStatement;
use crate::ast::types::{LogicalType, Value};
use crate::core::{DatabaseError, Result};
use crate::values::ValueCollector;

/// The kind of value an expression evaluates to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    Boolean,
    Number,
    String,
    /// Column references carry no type and fit every domain
    Any,
}

impl Domain {
    fn accepts(self, other: Domain) -> bool {
        self == Domain::Any || other == Domain::Any || self == other
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl Literal {
    pub fn domain(&self) -> Domain {
        match self {
            Literal::Boolean(_) => Domain::Boolean,
            Literal::Integer(_) | Literal::Float(_) => Domain::Number,
            Literal::String(_) => Domain::String,
        }
    }

    /// The value bound in place of this literal in parameterized statements.
    pub fn value(&self) -> Value {
        match self {
            Literal::Boolean(value) => Value::Boolean(*value),
            Literal::Integer(value) => Value::Int64(*value),
            Literal::Float(value) => Value::Float64(*value),
            Literal::String(value) => Value::String(value.clone()),
        }
    }
}

/// A column, optionally qualified by the table that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnReference {
    name: String,
    table: Option<String>,
}

impl ColumnReference {
    pub fn new(name: impl Into<String>) -> Self {
        ColumnReference {
            name: name.into(),
            table: None,
        }
    }

    pub fn qualified(table: impl Into<String>, name: impl Into<String>) -> Self {
        ColumnReference {
            name: name.into(),
            table: Some(table.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Not,
    Negate,
}

impl UnaryOperator {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOperator::Not => "NOT ",
            UnaryOperator::Negate => "-",
        }
    }

    fn domain(self) -> Domain {
        match self {
            UnaryOperator::Not => Domain::Boolean,
            UnaryOperator::Negate => Domain::Number,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    And,
    Or,
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
}

impl BinaryOperator {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOperator::And => "AND",
            BinaryOperator::Or => "OR",
            BinaryOperator::Equal => "=",
            BinaryOperator::NotEqual => "<>",
            BinaryOperator::Less => "<",
            BinaryOperator::LessOrEqual => "<=",
            BinaryOperator::Greater => ">",
            BinaryOperator::GreaterOrEqual => ">=",
            BinaryOperator::Add => "+",
            BinaryOperator::Subtract => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::Modulo => "%",
        }
    }

    fn is_logical(self) -> bool {
        matches!(self, BinaryOperator::And | BinaryOperator::Or)
    }

    fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOperator::Add
                | BinaryOperator::Subtract
                | BinaryOperator::Multiply
                | BinaryOperator::Divide
                | BinaryOperator::Modulo
        )
    }

    fn result_domain(self) -> Domain {
        if self.is_arithmetic() {
            Domain::Number
        } else {
            Domain::Boolean
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariadicOperator {
    Greatest,
    Least,
    Coalesce,
    Concat,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnaryExpression {
    operator: UnaryOperator,
    operand: Box<Expression>,
}

impl UnaryExpression {
    pub fn operator(&self) -> UnaryOperator {
        self.operator
    }

    pub fn operand(&self) -> &Expression {
        &self.operand
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinaryExpression {
    operator: BinaryOperator,
    left: Box<Expression>,
    right: Box<Expression>,
}

impl BinaryExpression {
    pub fn operator(&self) -> BinaryOperator {
        self.operator
    }

    pub fn left(&self) -> &Expression {
        &self.left
    }

    pub fn right(&self) -> &Expression {
        &self.right
    }
}

/// An operator applied to a non-empty, ordered list of operands.
#[derive(Debug, Clone, PartialEq)]
pub struct VariadicExpression {
    operator: VariadicOperator,
    operands: Vec<Expression>,
}

impl VariadicExpression {
    pub fn operator(&self) -> VariadicOperator {
        self.operator
    }

    pub fn operands(&self) -> &[Expression] {
        &self.operands
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Literal),
    Column(ColumnReference),
    /// A typed value from the schema collaborator, only ever bound as a parameter
    Bound(Value),
    Unary(UnaryExpression),
    Binary(BinaryExpression),
    Variadic(VariadicExpression),
    /// The current time in milliseconds since the Unix epoch
    CurrentTime,
    Exists(Box<SelectStatement>),
}

impl Expression {
    pub fn boolean(value: bool) -> Self {
        Expression::Literal(Literal::Boolean(value))
    }

    pub fn integer(value: i64) -> Self {
        Expression::Literal(Literal::Integer(value))
    }

    pub fn float(value: f64) -> Self {
        Expression::Literal(Literal::Float(value))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Expression::Literal(Literal::String(value.into()))
    }

    pub fn column(name: impl Into<String>) -> Self {
        Expression::Column(ColumnReference::new(name))
    }

    pub fn qualified_column(table: impl Into<String>, name: impl Into<String>) -> Self {
        Expression::Column(ColumnReference::qualified(table, name))
    }

    pub fn current_time() -> Self {
        Expression::CurrentTime
    }

    pub fn exists(selection: SelectStatement) -> Self {
        Expression::Exists(Box::new(selection))
    }

    pub fn unary(operator: UnaryOperator, operand: Expression) -> Result<Self> {
        let expected = operator.domain();
        if !expected.accepts(operand.domain()) {
            return Err(DatabaseError::MalformedStatement(format!(
                "{:?} expects a {:?} operand but got {:?}",
                operator,
                expected,
                operand.domain()
            )));
        }
        Ok(Expression::Unary(UnaryExpression {
            operator,
            operand: Box::new(operand),
        }))
    }

    pub fn binary(operator: BinaryOperator, left: Expression, right: Expression) -> Result<Self> {
        let (left_domain, right_domain) = (left.domain(), right.domain());
        let valid = if operator.is_logical() {
            Domain::Boolean.accepts(left_domain) && Domain::Boolean.accepts(right_domain)
        } else if operator.is_arithmetic() {
            Domain::Number.accepts(left_domain) && Domain::Number.accepts(right_domain)
        } else {
            left_domain.accepts(right_domain)
        };
        if !valid {
            return Err(DatabaseError::MalformedStatement(format!(
                "{:?} cannot combine a {:?} and a {:?} operand",
                operator, left_domain, right_domain
            )));
        }
        Ok(Expression::Binary(BinaryExpression {
            operator,
            left: Box::new(left),
            right: Box::new(right),
        }))
    }

    pub fn variadic(operator: VariadicOperator, operands: Vec<Expression>) -> Result<Self> {
        if operands.is_empty() {
            return Err(DatabaseError::MalformedStatement(format!(
                "{:?} needs at least one operand",
                operator
            )));
        }
        let valid = match operator {
            VariadicOperator::Concat => operands.iter().all(|o| o.domain() != Domain::Boolean),
            _ => {
                let common = common_domain(&operands);
                operands.iter().all(|o| common.accepts(o.domain()))
            }
        };
        if !valid {
            return Err(DatabaseError::MalformedStatement(format!(
                "the operands of {:?} do not share a domain",
                operator
            )));
        }
        Ok(Expression::Variadic(VariadicExpression { operator, operands }))
    }

    pub fn not(operand: Expression) -> Result<Self> {
        Expression::unary(UnaryOperator::Not, operand)
    }

    pub fn and(left: Expression, right: Expression) -> Result<Self> {
        Expression::binary(BinaryOperator::And, left, right)
    }

    pub fn or(left: Expression, right: Expression) -> Result<Self> {
        Expression::binary(BinaryOperator::Or, left, right)
    }

    pub fn equal(left: Expression, right: Expression) -> Result<Self> {
        Expression::binary(BinaryOperator::Equal, left, right)
    }

    pub fn domain(&self) -> Domain {
        match self {
            Expression::Literal(literal) => literal.domain(),
            Expression::Column(_) => Domain::Any,
            Expression::Bound(value) => match value.logical_type() {
                _ if value.is_null() => Domain::Any,
                LogicalType::Boolean => Domain::Boolean,
                LogicalType::String => Domain::String,
                LogicalType::Binary | LogicalType::Binary128 | LogicalType::Binary256 => Domain::Any,
                _ => Domain::Number,
            },
            Expression::Unary(unary) => unary.operator.domain(),
            Expression::Binary(binary) => binary.operator.result_domain(),
            Expression::Variadic(variadic) => match variadic.operator {
                VariadicOperator::Concat => Domain::String,
                _ => common_domain(&variadic.operands),
            },
            Expression::CurrentTime => Domain::Number,
            Expression::Exists(_) => Domain::Boolean,
        }
    }

    /// Whether the expression contains a subquery anywhere below it.
    pub fn contains_selection(&self) -> bool {
        match self {
            Expression::Exists(_) => true,
            Expression::Unary(unary) => unary.operand.contains_selection(),
            Expression::Binary(binary) => {
                binary.left.contains_selection() || binary.right.contains_selection()
            }
            Expression::Variadic(variadic) => {
                variadic.operands.iter().any(Expression::contains_selection)
            }
            Expression::Literal(_)
            | Expression::Column(_)
            | Expression::Bound(_)
            | Expression::CurrentTime => false,
        }
    }

    /// Collects the literal values pre-order, left to right, which is the
    /// order in which their placeholders appear in the rendered text.
    pub fn store_values(&self, collector: &mut dyn ValueCollector) {
        match self {
            Expression::Literal(literal) => collector.collect(literal.value()),
            Expression::Bound(value) => collector.collect(value.clone()),
            Expression::Column(_) | Expression::CurrentTime => {}
            Expression::Unary(unary) => unary.operand.store_values(collector),
            Expression::Binary(binary) => {
                binary.left.store_values(collector);
                binary.right.store_values(collector);
            }
            Expression::Variadic(variadic) => {
                for operand in &variadic.operands {
                    operand.store_values(collector);
                }
            }
            Expression::Exists(selection) => selection.store_values(collector),
        }
    }
}

fn common_domain(operands: &[Expression]) -> Domain {
    operands
        .iter()
        .map(Expression::domain)
        .find(|domain| *domain != Domain::Any)
        .unwrap_or(Domain::Any)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boolean_operators_require_boolean_operands() {
        assert!(Expression::and(Expression::boolean(true), Expression::column("flag")).is_ok());

        let result = Expression::and(Expression::boolean(true), Expression::integer(1));
        match result {
            Err(DatabaseError::MalformedStatement(msg)) => assert!(msg.contains("And")),
            other => panic!("Expected MalformedStatement, got {:?}", other),
        }
    }

    #[test]
    fn test_arithmetic_and_comparison_domains() {
        let modulo = Expression::binary(
            BinaryOperator::Modulo,
            Expression::column("value"),
            Expression::integer(7),
        )
        .unwrap();
        assert_eq!(modulo.domain(), Domain::Number);

        let check = Expression::equal(modulo, Expression::integer(0)).unwrap();
        assert_eq!(check.domain(), Domain::Boolean);

        assert!(Expression::equal(Expression::string("a"), Expression::integer(1)).is_err());
        assert!(Expression::binary(
            BinaryOperator::Add,
            Expression::string("a"),
            Expression::integer(1)
        )
        .is_err());
        assert!(Expression::unary(UnaryOperator::Negate, Expression::boolean(true)).is_err());
    }

    #[test]
    fn test_variadic_requires_operands() {
        let result = Expression::variadic(VariadicOperator::Greatest, Vec::new());
        assert!(matches!(result, Err(DatabaseError::MalformedStatement(_))));

        let mixed = Expression::variadic(
            VariadicOperator::Coalesce,
            vec![Expression::column("a"), Expression::integer(1), Expression::string("x")],
        );
        assert!(mixed.is_err());

        let concat = Expression::variadic(
            VariadicOperator::Concat,
            vec![Expression::column("a"), Expression::string("x")],
        )
        .unwrap();
        assert_eq!(concat.domain(), Domain::String);
    }

    #[test]
    fn test_store_values_is_pre_order_left_to_right() {
        let expression = Expression::and(Expression::boolean(true), Expression::boolean(false)).unwrap();
        let mut values: Vec<Value> = Vec::new();
        expression.store_values(&mut values);
        assert_eq!(values, vec![Value::Boolean(true), Value::Boolean(false)]);

        let nested = Expression::or(
            Expression::equal(Expression::column("a"), Expression::integer(1)).unwrap(),
            Expression::not(Expression::equal(Expression::string("b"), Expression::column("c")).unwrap())
                .unwrap(),
        )
        .unwrap();
        let mut values: Vec<Value> = Vec::new();
        nested.store_values(&mut values);
        assert_eq!(values, vec![Value::Int64(1), Value::String("b".to_string())]);
    }
}
