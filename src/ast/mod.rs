//! Dialect-neutral SQL abstract syntax tree.
//!
//! Nodes are immutable and exclusively own their children. Statements are
//! rendered to text by a [`crate::dialect::Dialect`]; the tree itself knows
//! nothing about any backend.

pub mod expression;
pub mod statement;
pub mod types;

pub use expression::*;
pub use statement::*;
pub use types::*;
