/// Connection Management Module
///
/// This module provides the process-wide database, the per-context
/// connections opened from it, and the locking and transaction lifecycle of
/// those connections.
///
/// A [`Database`] is shared by every execution context of the process. Each
/// context obtains its own [`ConnectionContext`], which lazily opens and owns
/// exactly one live connection. Contexts lock before they touch the
/// database; for dialects whose engine tolerates only one writer, the lock is
/// a process-wide gate all contexts contend for.
use crate::ast::{
    CreateTableStatement, DropTableStatement, InsertStatement, SelectStatement,
    Statement as AstStatement, Value,
};
use crate::config::DatabaseConfig;
use crate::core::db::driver::{Driver, DriverConnection, DriverError, RawValue};
use crate::core::db::purge::PurgeRegistry;
use crate::core::db::sqlite::SqliteDriver;
use crate::core::db::statement::{PreparedStatement, Statement};
use crate::core::{DatabaseError, Result};
use crate::dialect::{Dialect, KeyRetrieval, Unit};
use crate::values::RowCursor;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How long the liveness probe may take before a connection counts as stale
pub const VALIDITY_TIMEOUT: Duration = Duration::from_secs(1);

/// The process-wide database, set once by [`Database::initialize`]
static DATABASE: Lazy<RwLock<Option<Arc<Database>>>> = Lazy::new(|| RwLock::new(None));

/// Whether this process is the only one accessing the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    /// Only this process accesses the database, so it may cache what it reads
    #[default]
    Single,
    /// Other processes may change the database at any time
    Multi,
}

/// Lifecycle of a connection context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection has been opened yet
    Uninitialized,
    /// A connection is open or will be reopened on the next lock
    Open,
    /// The context was closed and cannot be used anymore
    Closed,
}

/// A process-wide mutual exclusion slot that remembers which context holds it.
#[derive(Debug, Default)]
struct AccessGate {
    owner: Mutex<Option<u64>>,
    available: Condvar,
}

impl AccessGate {
    fn acquire(&self, context: u64) {
        let mut owner = self.owner.lock().unwrap_or_else(PoisonError::into_inner);
        while owner.is_some() {
            owner = self
                .available
                .wait(owner)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *owner = Some(context);
    }

    fn release(&self, context: u64) {
        let mut owner = self.owner.lock().unwrap_or_else(PoisonError::into_inner);
        if *owner == Some(context) {
            *owner = None;
            self.available.notify_one();
        }
    }
}

/// The database shared by all execution contexts of the process.
pub struct Database {
    dialect: Dialect,
    access_mode: AccessMode,
    driver: Box<dyn Driver>,
    gate: AccessGate,
    purge_registry: Arc<PurgeRegistry>,
    next_context: AtomicU64,
    retired: AtomicBool,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("dialect", &self.dialect)
            .field("access_mode", &self.access_mode)
            .field("driver", &self.driver)
            .field("retired", &self.retired.load(Ordering::SeqCst))
            .finish()
    }
}

impl Database {
    pub fn new(dialect: Dialect, access_mode: AccessMode, driver: Box<dyn Driver>) -> Arc<Self> {
        Arc::new(Database {
            dialect,
            access_mode,
            driver,
            gate: AccessGate::default(),
            purge_registry: Arc::new(PurgeRegistry::new()),
            next_context: AtomicU64::new(1),
            retired: AtomicBool::new(false),
        })
    }

    /// Builds the database described by `config`.
    ///
    /// SQLite-class dialects open their file through [`SqliteDriver`] unless a
    /// driver is supplied. Server dialects need a caller-supplied driver,
    /// since this crate ships no network client.
    pub fn from_config(config: &DatabaseConfig, driver: Option<Box<dyn Driver>>) -> Result<Arc<Self>> {
        config.validate()?;
        let driver = match driver {
            Some(driver) => driver,
            None if config.dialect.is_sqlite_class() => {
                let sqlite = config.sqlite_config();
                Box::new(
                    SqliteDriver::open(sqlite.database_path()?)
                        .with_busy_timeout(Duration::from_millis(sqlite.busy_timeout_ms)),
                )
            }
            None => {
                let server = config.server_config();
                return Err(DatabaseError::Config(format!(
                    "the {} dialect needs a driver for {}:{}",
                    config.dialect,
                    server.host,
                    server.port_for(config.dialect).unwrap_or_default()
                )));
            }
        };
        Ok(Database::new(config.dialect, config.access_mode, driver))
    }

    /// Installs the process-wide database. Fails if one is installed already.
    pub fn initialize(
        dialect: Dialect,
        access_mode: AccessMode,
        driver: Box<dyn Driver>,
    ) -> Result<Arc<Self>> {
        let mut slot = DATABASE.write().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(DatabaseError::AlreadyInitialized);
        }
        let database = Database::new(dialect, access_mode, driver);
        *slot = Some(Arc::clone(&database));
        info!(dialect = %dialect, ?access_mode, "Initialized the database");
        Ok(database)
    }

    /// The process-wide database.
    pub fn current() -> Result<Arc<Self>> {
        DATABASE
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(DatabaseError::NotInitialized)
    }

    /// Removes the process-wide database so that it can be initialized again.
    ///
    /// Contexts still referring to the removed database drop their connection
    /// on their next lock. Meant for test teardown.
    pub fn reset() {
        let previous = DATABASE
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(database) = previous {
            database.retired.store(true, Ordering::SeqCst);
            debug!("Reset the database");
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn access_mode(&self) -> AccessMode {
        self.access_mode
    }

    pub fn is_single_access(&self) -> bool {
        self.access_mode == AccessMode::Single
    }

    pub fn requires_serialized_access(&self) -> bool {
        self.dialect.requires_serialized_access()
    }

    pub fn purge_registry(&self) -> &Arc<PurgeRegistry> {
        &self.purge_registry
    }

    fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    /// A new execution context with its own, not yet opened, connection.
    pub fn context(self: &Arc<Self>) -> ConnectionContext {
        ConnectionContext {
            database: Arc::clone(self),
            id: self.next_context.fetch_add(1, Ordering::SeqCst),
            connection: None,
            lock_depth: 0,
            holds_gate: false,
            last_error: None,
            state: ConnectionState::Uninitialized,
        }
    }
}

/// A named point inside a transaction that can be rolled back to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Savepoint {
    name: String,
}

impl Savepoint {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// One execution context and the connection it exclusively owns.
///
/// A context is meant to stay on the thread that created it; it is `Send`
/// so that it can be moved to a worker, but it is never shared.
pub struct ConnectionContext {
    database: Arc<Database>,
    id: u64,
    connection: Option<Box<dyn DriverConnection>>,
    lock_depth: usize,
    holds_gate: bool,
    last_error: Option<String>,
    state: ConnectionState,
}

impl fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("id", &self.id)
            .field("dialect", &self.database.dialect)
            .field("open", &self.connection.is_some())
            .field("lock_depth", &self.lock_depth)
            .field("last_error", &self.last_error)
            .field("state", &self.state)
            .finish()
    }
}

impl ConnectionContext {
    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    pub fn dialect(&self) -> Dialect {
        self.database.dialect
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn lock_depth(&self) -> usize {
        self.lock_depth
    }

    pub fn is_locked(&self) -> bool {
        self.lock_depth > 0
    }

    /// The error of the last failed attempt to open a connection.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Acquires the reentrant lock of this context.
    ///
    /// The outermost acquisition takes the process-wide gate when the dialect
    /// needs serialized access and then validates the connection, replacing a
    /// stale one once before giving up with `FailedConnection`.
    pub fn lock(&mut self) -> Result<()> {
        if self.state == ConnectionState::Closed {
            return Err(DatabaseError::ContextClosed);
        }
        if self.database.is_retired() {
            self.discard_connection();
            return Err(DatabaseError::NotInitialized);
        }

        self.lock_depth += 1;
        if self.lock_depth == 1 {
            if self.database.requires_serialized_access() {
                self.database.gate.acquire(self.id);
                self.holds_gate = true;
            }
            if let Err(error) = self.check_connection(true) {
                self.lock_depth -= 1;
                self.release_gate();
                return Err(error);
            }
        }
        Ok(())
    }

    /// Releases one level of the lock.
    ///
    /// # Panics
    ///
    /// Panics if the lock is released more often than it was acquired.
    pub fn unlock(&mut self) {
        assert!(
            self.lock_depth > 0,
            "The lock was released more often than it was acquired."
        );
        self.lock_depth -= 1;
        if self.lock_depth == 0 {
            if self
                .connection
                .as_ref()
                .map_or(false, |connection| connection.in_transaction())
            {
                warn!(context = self.id, "Unlocked with an uncommitted transaction");
            }
            self.release_gate();
        }
    }

    /// Locks the context until the returned guard is dropped.
    pub fn lock_guard(&mut self) -> Result<LockGuard<'_>> {
        self.lock()?;
        Ok(LockGuard { context: self })
    }

    /// Runs `body` while locked. The lock is released on every exit path,
    /// including errors and panics.
    pub fn with_lock<T>(&mut self, body: impl FnOnce(&mut ConnectionContext) -> Result<T>) -> Result<T> {
        let mut guard = self.lock_guard()?;
        body(&mut *guard)
    }

    fn check_connection(&mut self, recurse: bool) -> Result<()> {
        if self.connection.is_none() {
            self.open()?;
        }
        let valid = match self.connection.as_mut() {
            Some(connection) => connection.is_valid(VALIDITY_TIMEOUT),
            None => false,
        };
        if valid {
            return Ok(());
        }

        self.discard_connection();
        if recurse {
            info!(context = self.id, "Replacing an invalid database connection");
            self.check_connection(false)
        } else {
            error!(context = self.id, "The replacement connection is invalid as well");
            self.last_error = Some(DriverError::Invalid.to_string());
            Err(DatabaseError::FailedConnection(DriverError::Invalid))
        }
    }

    fn open(&mut self) -> Result<()> {
        match self.database.driver.connect() {
            Ok(connection) => {
                debug!(context = self.id, "Opened a database connection");
                self.connection = Some(connection);
                self.last_error = None;
                self.state = ConnectionState::Open;
                Ok(())
            }
            Err(source) => {
                error!(context = self.id, error = %source, "Could not open a database connection");
                self.last_error = Some(source.to_string());
                Err(DatabaseError::FailedConnection(source))
            }
        }
    }

    fn discard_connection(&mut self) {
        if let Some(connection) = self.connection.take() {
            if let Err(error) = connection.close() {
                debug!(context = self.id, %error, "Could not close a discarded connection");
            }
        }
    }

    fn release_gate(&mut self) {
        if self.holds_gate {
            self.database.gate.release(self.id);
            self.holds_gate = false;
        }
    }

    fn assert_locked(&self) {
        assert!(self.lock_depth > 0, "The connection context is not locked.");
    }

    /// The live connection of a locked context.
    pub fn connection(&mut self) -> Result<&mut Box<dyn DriverConnection>> {
        self.assert_locked();
        if self.state == ConnectionState::Closed {
            return Err(DatabaseError::ContextClosed);
        }
        self.connection
            .as_mut()
            .ok_or(DatabaseError::FailedConnection(DriverError::Closed))
    }

    /// Commits the current transaction. On failure the transaction is left as
    /// it is and the context should be torn down.
    pub fn commit(&mut self) -> Result<()> {
        let id = self.id;
        self.connection()?
            .commit()
            .map_err(DatabaseError::FailedCommit)?;
        debug!(context = id, "Committed the transaction");
        Ok(())
    }

    /// Rolls the current transaction back. Failures are logged, never returned.
    pub fn rollback(&mut self) {
        self.assert_locked();
        if let Some(connection) = self.connection.as_mut() {
            match connection.rollback() {
                Ok(()) => debug!(context = self.id, "Rolled back the transaction"),
                Err(error) => error!(context = self.id, %error, "Could not roll back the transaction"),
            }
        }
    }

    /// Sets a savepoint, or returns `None` if the dialect has no savepoints.
    pub fn set_savepoint(&mut self) -> Result<Option<Savepoint>> {
        if !self.dialect().supports_savepoints() {
            self.assert_locked();
            return Ok(None);
        }
        let savepoint = Savepoint {
            name: format!("sp_{}", Uuid::new_v4().simple()),
        };
        self.connection()?
            .set_savepoint(&savepoint.name)
            .map_err(DatabaseError::FailedSavepointCreation)?;
        Ok(Some(savepoint))
    }

    /// Undoes everything since the savepoint and releases it. Rolling back to
    /// no savepoint does nothing.
    pub fn rollback_to(&mut self, savepoint: Option<Savepoint>) -> Result<()> {
        let savepoint = match savepoint {
            Some(savepoint) => savepoint,
            None => return Ok(()),
        };
        let connection = self.connection()?;
        connection
            .rollback_to_savepoint(&savepoint.name)
            .map_err(DatabaseError::FailedSavepointRollback)?;
        connection
            .release_savepoint(&savepoint.name)
            .map_err(DatabaseError::FailedSavepointRollback)
    }

    /// Keeps everything since the savepoint and forgets the savepoint.
    pub fn release_savepoint(&mut self, savepoint: Option<Savepoint>) -> Result<()> {
        match savepoint {
            Some(savepoint) => self
                .connection()?
                .release_savepoint(&savepoint.name)
                .map_err(DatabaseError::FailedSavepointRollback),
            None => Ok(()),
        }
    }

    pub fn create_statement(&mut self) -> Result<Statement<'_>> {
        self.connection()?
            .check_statement()
            .map_err(DatabaseError::FailedStatementCreation)?;
        Ok(Statement::new(self))
    }

    pub fn prepare_statement(&mut self, sql: &str) -> Result<PreparedStatement<'_>> {
        self.connection()?
            .prepare(sql)
            .map_err(|source| DatabaseError::FailedPreparedStatementCreation {
                sql: sql.to_string(),
                source,
            })?;
        Ok(PreparedStatement::new(self, sql))
    }

    /// Executes an insert and returns the key the backend generated for it,
    /// retrieved the way the dialect hands keys back.
    pub fn execute_insert(&mut self, sql: &str, values: &[Value]) -> Result<i64> {
        let retrieval = self.dialect().key_retrieval();
        let connection = self.connection()?;
        let update_error = |source| DatabaseError::FailedUpdateExecution {
            sql: sql.to_string(),
            source,
        };
        let key = match retrieval {
            KeyRetrieval::GeneratedKeys => connection
                .execute_returning_key(sql, values)
                .map_err(update_error)?,
            KeyRetrieval::LastInsertId(query) => {
                let changed = connection.execute(sql, values).map_err(update_error)?;
                if changed == 0 {
                    None
                } else {
                    let rows = connection.query(query, &[]).map_err(|source| {
                        DatabaseError::FailedKeyGeneration {
                            sql: sql.to_string(),
                            source: Some(source),
                        }
                    })?;
                    match rows.first().and_then(|row| row.first()) {
                        Some(RawValue::Integer(key)) => Some(*key),
                        _ => None,
                    }
                }
            }
        };
        key.ok_or_else(|| DatabaseError::FailedKeyGeneration {
            sql: sql.to_string(),
            source: None,
        })
    }

    /// Renders a data statement for `unit` and executes it with its values
    /// bound, returning the number of affected rows.
    pub fn execute(&mut self, statement: &AstStatement, unit: &Unit) -> Result<usize> {
        let (sql, values) = self.dialect().render(statement, unit)?;
        let mut prepared = self.prepare_statement(&sql)?;
        prepared.bind_all(values);
        prepared.execute_update()
    }

    /// Renders and runs a selection, returning one cursor per row.
    pub fn select(&mut self, selection: &SelectStatement, unit: &Unit) -> Result<Vec<RowCursor>> {
        let (sql, values) = self
            .dialect()
            .render(&AstStatement::Select(selection.clone()), unit)?;
        let mut prepared = self.prepare_statement(&sql)?;
        prepared.bind_all(values);
        prepared.execute_query()
    }

    /// Renders and runs an insert, returning the generated key.
    pub fn insert(&mut self, insert: &InsertStatement, unit: &Unit) -> Result<i64> {
        let (sql, values) = self
            .dialect()
            .render(&AstStatement::Insert(insert.clone()), unit)?;
        let mut prepared = self.prepare_statement(&sql)?;
        prepared.bind_all(values);
        prepared.execute_insert()
    }

    /// Creates the unit's schema, the table and its index.
    pub fn create_table(&mut self, create: &CreateTableStatement, unit: &Unit) -> Result<()> {
        let script = self.dialect().render_create_table_script(create, unit)?;
        let mut statement = self.create_statement()?;
        for sql in &script {
            statement.execute_update(sql)?;
        }
        Ok(())
    }

    pub fn drop_table(&mut self, table_name: &str, unit: &Unit) -> Result<()> {
        let mut sql = String::new();
        self.dialect().unparse(
            &AstStatement::DropTable(DropTableStatement::new(table_name)),
            unit,
            &mut sql,
        )?;
        self.create_statement()?.execute_update(&sql)?;
        Ok(())
    }

    pub fn on_insert_ignore(&mut self, table_name: &str, key_columns: &[&str], unit: &Unit) -> Result<()> {
        let rule = self.dialect().on_insert_ignore(table_name, key_columns, unit)?;
        self.execute_rule(rule)
    }

    pub fn on_insert_not_ignore(&mut self, table_name: &str, unit: &Unit) -> Result<()> {
        let rule = self.dialect().on_insert_not_ignore(table_name, unit)?;
        self.execute_rule(rule)
    }

    pub fn on_insert_update(&mut self, create: &CreateTableStatement, unit: &Unit) -> Result<()> {
        let rule = self.dialect().on_insert_update(create, unit)?;
        self.execute_rule(rule)
    }

    pub fn on_insert_not_update(&mut self, table_name: &str, unit: &Unit) -> Result<()> {
        let rule = self.dialect().on_insert_not_update(table_name, unit)?;
        self.execute_rule(rule)
    }

    fn execute_rule(&mut self, rule: Option<String>) -> Result<()> {
        self.assert_locked();
        if let Some(sql) = rule {
            self.create_statement()?.execute_update(&sql)?;
        }
        Ok(())
    }

    /// Closes the connection of this context for good.
    pub fn close(&mut self) -> Result<()> {
        self.release_gate();
        self.state = ConnectionState::Closed;
        if let Some(connection) = self.connection.take() {
            connection.close().map_err(DatabaseError::FailedClosing)?;
            debug!(context = self.id, "Closed the database connection");
        }
        Ok(())
    }
}

impl Drop for ConnectionContext {
    fn drop(&mut self) {
        self.release_gate();
        self.discard_connection();
    }
}

/// Holds the lock of a context and releases it when dropped.
#[derive(Debug)]
pub struct LockGuard<'a> {
    context: &'a mut ConnectionContext,
}

impl Deref for LockGuard<'_> {
    type Target = ConnectionContext;

    fn deref(&self) -> &ConnectionContext {
        self.context
    }
}

impl DerefMut for LockGuard<'_> {
    fn deref_mut(&mut self) -> &mut ConnectionContext {
        self.context
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.context.unlock();
    }
}
