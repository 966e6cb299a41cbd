//! Common test utilities for yelp-ingest integration tests
//!
//! [`MemoryDatabase`] stands in for Postgres behind the `ConnectionSource`
//! seam. It honours conflict keys, assigns sequential surrogate ids, applies
//! each batch atomically, and can inject write failures per table. Handles are
//! bounded by a semaphore and counted, so tests can check that every
//! connection was returned.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::MemoryDatabase;
//!
//! #[tokio::test]
//! async fn test_load() {
//!     let db = MemoryDatabase::new(2);
//!     // ... run a coordinator against Arc::new(db.clone())
//!     assert_eq!(db.outstanding(), 0);
//! }
//! ```

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use yelp_common::{LoaderError, Result};
use yelp_ingest::batch::{Batch, SqlValue};
use yelp_ingest::coordinator::CoordinatorSettings;
use yelp_ingest::db::{ConnectionSource, TableWriter, WriteError};
use yelp_ingest::retry::RetryPolicy;
use yelp_ingest::schema::TableSpec;

/// One stored row plus its surrogate id.
#[derive(Debug, Clone)]
pub struct StoredRow {
    pub id: i64,
    pub values: BTreeMap<&'static str, SqlValue>,
}

impl StoredRow {
    pub fn text(&self, column: &str) -> Option<&str> {
        match self.values.get(column) {
            Some(SqlValue::Text(value)) => Some(value),
            _ => None,
        }
    }

    pub fn int(&self, column: &str) -> Option<i64> {
        match self.values.get(column) {
            Some(SqlValue::Int(value)) => Some(*value),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Clone)]
struct TableData {
    rows: Vec<StoredRow>,
    keys: BTreeSet<String>,
    next_id: i64,
}

#[derive(Debug, Clone, Copy)]
enum Fault {
    LockConflict { remaining: u32 },
    Broken,
}

#[derive(Debug, Default)]
struct State {
    tables: HashMap<&'static str, TableData>,
    faults: HashMap<&'static str, Fault>,
    /// Table of every committed non-empty write, in commit order.
    commits: Vec<&'static str>,
    write_calls: usize,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    permits: Arc<Semaphore>,
    outstanding: AtomicUsize,
    peak: AtomicUsize,
}

/// In-memory stand-in for the database and its bounded pool.
#[derive(Debug, Clone)]
pub struct MemoryDatabase {
    shared: Arc<Shared>,
}

impl MemoryDatabase {
    /// A pool with room for `capacity` simultaneous handles.
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                permits: Arc::new(Semaphore::new(capacity)),
                outstanding: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }),
        }
    }

    /// Fail the next `times` writes to `table` with a deadlock.
    pub fn fail_next(&self, table: &'static str, times: u32) {
        self.state()
            .faults
            .insert(table, Fault::LockConflict { remaining: times });
    }

    /// Fail every write to `table` with a non-retryable database error.
    pub fn break_table(&self, table: &'static str) {
        self.state().faults.insert(table, Fault::Broken);
    }

    pub fn rows(&self, table: &str) -> Vec<StoredRow> {
        self.state()
            .tables
            .get(table)
            .map(|data| data.rows.clone())
            .unwrap_or_default()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.state()
            .tables
            .get(table)
            .map_or(0, |data| data.rows.len())
    }

    /// Committed writes in order, by table name.
    pub fn commits(&self) -> Vec<&'static str> {
        self.state().commits.clone()
    }

    pub fn write_calls(&self) -> usize {
        self.state().write_calls
    }

    /// Handles currently checked out.
    pub fn outstanding(&self) -> usize {
        self.shared.outstanding.load(Ordering::SeqCst)
    }

    /// Most handles ever checked out at once.
    pub fn peak(&self) -> usize {
        self.shared.peak.load(Ordering::SeqCst)
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.shared.state.lock().unwrap()
    }
}

#[async_trait]
impl ConnectionSource for MemoryDatabase {
    type Handle = MemoryConnection;

    async fn acquire(&self) -> Result<MemoryConnection> {
        let permit = self
            .shared
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| LoaderError::PoolNotInitialized)?;
        let now = self.shared.outstanding.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.peak.fetch_max(now, Ordering::SeqCst);
        Ok(MemoryConnection {
            shared: self.shared.clone(),
            _permit: permit,
        })
    }
}

/// A checked-out handle. Dropping it returns it to the pool.
#[derive(Debug)]
pub struct MemoryConnection {
    shared: Arc<Shared>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.shared.outstanding.fetch_sub(1, Ordering::SeqCst);
    }
}

fn conflict_key(table: &TableSpec, columns: &[&'static str], row: &[SqlValue]) -> Option<String> {
    if table.conflict_columns.is_empty() {
        return None;
    }
    let parts: Vec<String> = table
        .conflict_columns
        .iter()
        .map(|key| {
            columns
                .iter()
                .position(|column| column == key)
                .map(|index| format!("{:?}", row[index]))
                .unwrap_or_default()
        })
        .collect();
    Some(parts.join("|"))
}

#[async_trait]
impl TableWriter for MemoryConnection {
    async fn write_batch(&mut self, batch: &Batch) -> std::result::Result<u64, WriteError> {
        let mut state = self.shared.state.lock().unwrap();
        state.write_calls += 1;
        let table = batch.table();

        match state.faults.get(table.name).copied() {
            Some(Fault::Broken) => {
                return Err(WriteError::Database(sqlx::Error::Protocol(format!(
                    "relation \"{}\" is broken",
                    table.name
                ))));
            },
            Some(Fault::LockConflict { remaining }) if remaining > 0 => {
                state.faults.insert(
                    table.name,
                    Fault::LockConflict {
                        remaining: remaining - 1,
                    },
                );
                return Err(WriteError::LockConflict {
                    code: "40P01".to_string(),
                    message: "deadlock detected".to_string(),
                });
            },
            _ => {},
        }

        // Stage into a copy so a batch lands completely or not at all.
        let mut data = state.tables.get(table.name).cloned().unwrap_or_default();
        let mut inserted = 0;
        for row in batch.rows() {
            if let Some(key) = conflict_key(table, batch.columns(), row) {
                if !data.keys.insert(key) {
                    continue;
                }
            }
            data.next_id += 1;
            let values = batch
                .columns()
                .iter()
                .copied()
                .zip(row.iter().cloned())
                .collect();
            data.rows.push(StoredRow {
                id: data.next_id,
                values,
            });
            inserted += 1;
        }

        state.tables.insert(table.name, data);
        state.commits.push(table.name);
        Ok(inserted)
    }

    async fn find_id(
        &mut self,
        table: &TableSpec,
        _id_column: &str,
        key: &[(&'static str, SqlValue)],
    ) -> std::result::Result<Option<i64>, WriteError> {
        let state = self.shared.state.lock().unwrap();
        let found = state.tables.get(table.name).and_then(|data| {
            data.rows
                .iter()
                .find(|row| key.iter().all(|(column, value)| row.values.get(column) == Some(value)))
                .map(|row| row.id)
        });
        Ok(found)
    }
}

/// Two workers, no retry pause, hidden progress bar.
pub fn test_settings() -> CoordinatorSettings {
    CoordinatorSettings {
        workers: 2,
        retry: RetryPolicy::new(3),
        barrier_timeout: None,
        show_progress: false,
    }
}

/// Write `lines` as an NDJSON file at `dir/name`.
pub fn write_ndjson(dir: &Path, name: &str, lines: &[serde_json::Value]) {
    let body: Vec<String> = lines.iter().map(|line| line.to_string()).collect();
    std::fs::write(dir.join(name), body.join("\n") + "\n").unwrap();
}

static TRACING: Once = Once::new();

/// Route tracing output through the test harness.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("yelp_ingest=debug")
            .with_test_writer()
            .try_init();
    });
}
