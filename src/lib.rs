// Core infrastructure modules
pub mod core;

// Feature-specific modules
pub mod ast;
pub mod config;
pub mod dialect;
pub mod values;

#[cfg(test)]
mod test_utils;

pub use crate::core::db::{AccessMode, ConnectionContext, Database};
pub use crate::core::{DatabaseError, Result};
pub use crate::dialect::{Dialect, Unit};
