/// Core Module
///
/// This module contains the stateful half of the access layer: the error
/// taxonomy shared by the whole crate and the connection, transaction and
/// purge management built on top of an opaque driver.

pub mod db;
pub mod error;

// Re-export commonly used types for convenience
pub use error::{DatabaseError, Result};
