/// Purge Module
///
/// This module removes expired rows. Tables register a retention period in
/// the [`PurgeRegistry`]; a [`PurgeScheduler`] periodically deletes every row
/// whose `time` column is older than that period, committing table by table.
use crate::ast::DeleteStatement;
use crate::config::PurgeConfig;
use crate::core::db::connection::{ConnectionContext, Database};
use crate::core::Result;
use crate::dialect::Unit;
use std::collections::HashMap;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The column every purgeable table keeps its creation time in, in
/// milliseconds since the epoch
pub const TIME_COLUMN: &str = "time";

/// A table whose old rows are purged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgeEntry {
    pub unit: Unit,
    pub table: String,
    pub retention: Duration,
}

/// Maps tables to the time their rows are kept. Safe to modify from any thread.
#[derive(Debug, Default)]
pub struct PurgeRegistry {
    tables: Mutex<HashMap<(Unit, String), Duration>>,
}

impl PurgeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the table, replacing the retention of an earlier registration.
    pub fn add(&self, unit: &Unit, table: &str, retention: Duration) {
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((unit.clone(), table.to_string()), retention);
    }

    pub fn remove(&self, unit: &Unit, table: &str) -> Option<Duration> {
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(unit.clone(), table.to_string()))
    }

    pub fn len(&self) -> usize {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A snapshot of the registered tables, ordered by unit and table name.
    pub fn entries(&self) -> Vec<PurgeEntry> {
        let mut entries: Vec<PurgeEntry> = self
            .tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|((unit, table), retention)| PurgeEntry {
                unit: unit.clone(),
                table: table.clone(),
                retention: *retention,
            })
            .collect();
        entries.sort_by(|a, b| {
            (a.unit.name(), a.table.as_str()).cmp(&(b.unit.name(), b.table.as_str()))
        });
        entries
    }
}

/// The outcome of one purge run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeReport {
    /// Tables that were purged, with the number of deleted rows
    pub purged: Vec<(String, usize)>,
    /// Tables whose purge failed and was rolled back
    pub failed: Vec<String>,
}

/// Deletes the expired rows of every registered table.
///
/// Each table is committed on its own. A failing table is rolled back and
/// reported without stopping the remaining ones.
pub fn purge_once(context: &mut ConnectionContext, registry: &PurgeRegistry, now_ms: i64) -> Result<PurgeReport> {
    let entries = registry.entries();
    context.with_lock(|context| {
        let mut report = PurgeReport::default();
        for entry in entries {
            let retention = i64::try_from(entry.retention.as_millis()).unwrap_or(i64::MAX);
            let cutoff = now_ms.saturating_sub(retention);
            match purge_table(context, &entry, cutoff) {
                Ok(deleted) => {
                    debug!(table = %entry.table, deleted, "Purged expired rows");
                    report.purged.push((entry.table, deleted));
                }
                Err(error) => {
                    warn!(table = %entry.table, %error, "Could not purge the table");
                    context.rollback();
                    report.failed.push(entry.table);
                }
            }
        }
        Ok(report)
    })
}

fn purge_table(context: &mut ConnectionContext, entry: &PurgeEntry, cutoff: i64) -> Result<usize> {
    let delete = DeleteStatement::older_than(entry.table.as_str(), TIME_COLUMN, cutoff)?;
    let deleted = context.execute(&delete.into(), &entry.unit)?;
    context.commit()?;
    Ok(deleted)
}

/// Runs [`purge_once`] on a background thread with its own connection context.
#[derive(Debug)]
pub struct PurgeScheduler {
    stop: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl PurgeScheduler {
    /// Starts purging after `config.initial_delay()` and then every
    /// `config.interval()` until stopped.
    pub fn start(database: Arc<Database>, registry: Arc<PurgeRegistry>, config: &PurgeConfig) -> Self {
        let (stop, stopped) = mpsc::channel::<()>();
        let initial_delay = config.initial_delay();
        let interval = config.interval();

        let handle = thread::spawn(move || {
            let mut context = database.context();
            let mut wait = initial_delay;
            loop {
                match stopped.recv_timeout(wait) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
                let now = chrono::Utc::now().timestamp_millis();
                match purge_once(&mut context, &registry, now) {
                    Ok(report) if !report.failed.is_empty() => {
                        warn!(failed = ?report.failed, "Some tables could not be purged");
                    }
                    Ok(_) => {}
                    Err(error) => warn!(%error, "Skipped a purge run"),
                }
                wait = interval;
            }
            if let Err(error) = context.close() {
                debug!(%error, "Could not close the purge connection");
            }
            info!("Purge scheduler stopped");
        });

        PurgeScheduler {
            stop: Some(stop),
            handle: Some(handle),
        }
    }

    /// Stops the scheduler and waits for a running purge to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("The purge thread panicked");
            }
        }
    }
}

impl Drop for PurgeScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
