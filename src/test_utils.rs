/// # Test Utilities Module
///
/// A scriptable in-process driver for exercising the connection manager's
/// failure paths: stale connections, refused connects, failing commits,
/// rollbacks, statements and closes. Every statement a fake connection sees
/// is appended to a shared log so that tests can assert on what was issued.
use crate::ast::Value;
use crate::core::db::{Driver, DriverConnection, DriverError, RawValue};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug)]
struct FakeState {
    failing_validity_checks: usize,
    failing_connects: usize,
    fail_commits: bool,
    fail_rollbacks: bool,
    fail_statements: bool,
    fail_executions: bool,
    fail_closes: bool,
    failing_pattern: Option<String>,
    next_key: Option<i64>,
    rows: Vec<Vec<RawValue>>,
    connections_opened: usize,
    log: Vec<String>,
}

impl Default for FakeState {
    fn default() -> Self {
        FakeState {
            failing_validity_checks: 0,
            failing_connects: 0,
            fail_commits: false,
            fail_rollbacks: false,
            fail_statements: false,
            fail_executions: false,
            fail_closes: false,
            failing_pattern: None,
            next_key: Some(1),
            rows: Vec::new(),
            connections_opened: 0,
            log: Vec::new(),
        }
    }
}

/// Shared handle controlling every connection of a [`FakeDriver`].
#[derive(Debug, Clone, Default)]
pub struct FakeScript {
    state: Arc<Mutex<FakeState>>,
}

impl FakeScript {
    fn with_state<T>(&self, f: impl FnOnce(&mut FakeState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// The next `count` validity probes fail.
    pub fn fail_validity_checks(&self, count: usize) {
        self.with_state(|s| s.failing_validity_checks = count);
    }

    /// The next `count` connection attempts fail.
    pub fn fail_connects(&self, count: usize) {
        self.with_state(|s| s.failing_connects = count);
    }

    pub fn fail_commits(&self, fail: bool) {
        self.with_state(|s| s.fail_commits = fail);
    }

    pub fn fail_rollbacks(&self, fail: bool) {
        self.with_state(|s| s.fail_rollbacks = fail);
    }

    pub fn fail_statements(&self, fail: bool) {
        self.with_state(|s| s.fail_statements = fail);
    }

    pub fn fail_executions(&self, fail: bool) {
        self.with_state(|s| s.fail_executions = fail);
    }

    pub fn fail_closes(&self, fail: bool) {
        self.with_state(|s| s.fail_closes = fail);
    }

    /// Executions of SQL containing `pattern` fail.
    pub fn fail_sql_containing(&self, pattern: &str) {
        self.with_state(|s| s.failing_pattern = Some(pattern.to_string()));
    }

    pub fn set_next_key(&self, key: Option<i64>) {
        self.with_state(|s| s.next_key = key);
    }

    /// Rows returned by every query.
    pub fn set_rows(&self, rows: Vec<Vec<RawValue>>) {
        self.with_state(|s| s.rows = rows);
    }

    pub fn connections_opened(&self) -> usize {
        self.with_state(|s| s.connections_opened)
    }

    pub fn log(&self) -> Vec<String> {
        self.with_state(|s| s.log.clone())
    }
}

#[derive(Debug, Clone)]
pub struct FakeDriver {
    script: FakeScript,
}

impl FakeDriver {
    pub fn new(script: FakeScript) -> Self {
        FakeDriver { script }
    }
}

impl Driver for FakeDriver {
    fn connect(&self) -> Result<Box<dyn DriverConnection>, DriverError> {
        self.script.with_state(|s| {
            if s.failing_connects > 0 {
                s.failing_connects -= 1;
                return Err(DriverError::Backend("connection refused".to_string()));
            }
            s.connections_opened += 1;
            Ok(())
        })?;
        Ok(Box::new(FakeConnection {
            script: self.script.clone(),
            in_transaction: false,
        }))
    }
}

struct FakeConnection {
    script: FakeScript,
    in_transaction: bool,
}

impl FakeConnection {
    /// Logs the statement and decides whether it fails.
    fn run(&mut self, sql: &str, values: &[Value]) -> Result<(), DriverError> {
        let failed = self.script.with_state(|s| {
            if values.is_empty() {
                s.log.push(sql.to_string());
            } else {
                s.log.push(format!("{} {:?}", sql, values));
            }
            s.fail_executions
                || s.failing_pattern
                    .as_deref()
                    .map_or(false, |pattern| sql.contains(pattern))
        });
        if failed {
            return Err(DriverError::Backend(format!("refused to run {}", sql)));
        }
        self.in_transaction = true;
        Ok(())
    }

    fn log(&self, entry: String) {
        self.script.with_state(|s| s.log.push(entry));
    }
}

impl DriverConnection for FakeConnection {
    fn is_valid(&mut self, _timeout: Duration) -> bool {
        self.script.with_state(|s| {
            if s.failing_validity_checks > 0 {
                s.failing_validity_checks -= 1;
                false
            } else {
                true
            }
        })
    }

    fn check_statement(&mut self) -> Result<(), DriverError> {
        if self.script.with_state(|s| s.fail_statements) {
            return Err(DriverError::Backend("no statements available".to_string()));
        }
        Ok(())
    }

    fn prepare(&mut self, sql: &str) -> Result<(), DriverError> {
        if self.script.with_state(|s| s.fail_statements) {
            return Err(DriverError::Backend(format!("cannot prepare {}", sql)));
        }
        Ok(())
    }

    fn execute(&mut self, sql: &str, values: &[Value]) -> Result<usize, DriverError> {
        self.run(sql, values)?;
        Ok(1)
    }

    fn execute_batch(&mut self, sql: &str) -> Result<(), DriverError> {
        self.run(sql, &[])
    }

    fn query(&mut self, sql: &str, values: &[Value]) -> Result<Vec<Vec<RawValue>>, DriverError> {
        self.run(sql, values)?;
        Ok(self.script.with_state(|s| {
            if sql == "SELECT last_insert_rowid()" {
                s.next_key
                    .map(|key| vec![vec![RawValue::Integer(key)]])
                    .unwrap_or_default()
            } else {
                s.rows.clone()
            }
        }))
    }

    fn execute_returning_key(&mut self, sql: &str, values: &[Value]) -> Result<Option<i64>, DriverError> {
        self.run(sql, values)?;
        Ok(self.script.with_state(|s| s.next_key))
    }

    fn commit(&mut self) -> Result<(), DriverError> {
        self.log("COMMIT".to_string());
        if self.script.with_state(|s| s.fail_commits) {
            return Err(DriverError::Backend("commit refused".to_string()));
        }
        self.in_transaction = false;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), DriverError> {
        self.log("ROLLBACK".to_string());
        if self.script.with_state(|s| s.fail_rollbacks) {
            return Err(DriverError::Backend("rollback refused".to_string()));
        }
        self.in_transaction = false;
        Ok(())
    }

    fn set_savepoint(&mut self, name: &str) -> Result<(), DriverError> {
        self.log(format!("SAVEPOINT {}", name));
        Ok(())
    }

    fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), DriverError> {
        self.log(format!("ROLLBACK TO SAVEPOINT {}", name));
        Ok(())
    }

    fn release_savepoint(&mut self, name: &str) -> Result<(), DriverError> {
        self.log(format!("RELEASE SAVEPOINT {}", name));
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    fn close(self: Box<Self>) -> Result<(), DriverError> {
        if self.script.with_state(|s| s.fail_closes) {
            return Err(DriverError::Backend("close refused".to_string()));
        }
        Ok(())
    }
}
