/// Database Module
///
/// This module provides the connection and transaction management of the
/// access layer, organized into focused submodules.
///
/// ## Architecture
///
/// - **Driver seam** (`driver.rs`): the opaque storage collaborator
/// - **SQLite driver** (`sqlite.rs`): the `rusqlite` implementation of that seam
/// - **Connection Management** (`connection.rs`): the process-wide database,
///   per-context connections, locking, commit/rollback and savepoints
/// - **Statements** (`statement.rs`): plain and prepared statements bound to a
///   locked context
/// - **Purging** (`purge.rs`): the retention registry and its background scheduler
///
/// ## Error Handling
///
/// Backend failures surface as `DriverError` and are wrapped into the
/// `DatabaseError` variant naming the operation that failed.
pub mod connection;
pub mod driver;
pub mod purge;
pub mod sqlite;
pub mod statement;

pub use connection::*;
pub use driver::*;
pub use purge::*;
pub use sqlite::*;
pub use statement::*;
