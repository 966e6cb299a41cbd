//! Conflict-skipping batch writes with bounded retry.

use crate::batch::{Batch, SqlValue};
use crate::db::{TableWriter, WriteError};
use crate::retry::{Attempt, FailureClass, RetryError, RetryPolicy};
use crate::schema::TableSpec;
use async_trait::async_trait;
use tracing::{debug, error};
use yelp_common::{LoaderError, Result};

/// Writes batches through a [`TableWriter`], replaying failed transactions
/// according to its [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct BatchUpserter {
    retry: RetryPolicy,
}

impl BatchUpserter {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Insert `batch`, skipping rows that collide on the table's conflict key.
    /// Returns the number of rows actually inserted.
    ///
    /// An empty batch never touches the connection. Every attempt re-issues
    /// the whole batch in a fresh transaction.
    pub async fn upsert<W: TableWriter>(&self, conn: &mut W, batch: &Batch) -> Result<u64> {
        if batch.is_empty() {
            debug!(table = batch.table().name, "Skipping empty batch");
            return Ok(0);
        }

        let mut write = WriteBatch { conn, batch };
        self.retry
            .execute(&mut write, WriteError::class)
            .await
            .map_err(|err| into_loader_error(batch.table().name, err))
    }

    /// Look up the surrogate key of the `table` row matching `key`.
    pub async fn lookup_id<W: TableWriter>(
        &self,
        conn: &mut W,
        table: &'static TableSpec,
        id_column: &'static str,
        key: &[(&'static str, SqlValue)],
    ) -> Result<Option<i64>> {
        let mut lookup = FindId {
            conn,
            table,
            id_column,
            key,
        };
        self.retry
            .execute(&mut lookup, WriteError::class)
            .await
            .map_err(|err| into_loader_error(table.name, err))
    }
}

fn into_loader_error(table: &str, err: RetryError<WriteError>) -> LoaderError {
    match err {
        RetryError::Exhausted {
            attempts,
            class: FailureClass::Transient,
            source,
        } => {
            error!(table, attempts, error = %source, "Deadlock retries exhausted");
            LoaderError::DeadlockExceeded {
                table: table.to_string(),
                attempts,
            }
        },
        RetryError::Exhausted {
            attempts, source, ..
        }
        | RetryError::Fatal { attempts, source } => {
            error!(table, attempts, error = %source, "Database write failed");
            LoaderError::database(table, attempts, source)
        },
    }
}

struct WriteBatch<'a, W> {
    conn: &'a mut W,
    batch: &'a Batch,
}

#[async_trait]
impl<W: TableWriter> Attempt for WriteBatch<'_, W> {
    type Output = u64;
    type Error = WriteError;

    async fn attempt(&mut self) -> std::result::Result<u64, WriteError> {
        self.conn.write_batch(self.batch).await
    }

    fn target(&self) -> &str {
        self.batch.table().name
    }
}

struct FindId<'a, W> {
    conn: &'a mut W,
    table: &'static TableSpec,
    id_column: &'static str,
    key: &'a [(&'static str, SqlValue)],
}

#[async_trait]
impl<W: TableWriter> Attempt for FindId<'_, W> {
    type Output = Option<i64>;
    type Error = WriteError;

    async fn attempt(&mut self) -> std::result::Result<Option<i64>, WriteError> {
        self.conn.find_id(self.table, self.id_column, self.key).await
    }

    fn target(&self) -> &str {
        self.table.name
    }
}
