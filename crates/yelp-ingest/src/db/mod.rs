//! Database access seams.
//!
//! Workers talk to the database through two traits:
//!
//! - [`ConnectionSource`] hands out exclusive connection handles (a bounded pool)
//! - [`TableWriter`] is one handle: transactional batch writes and key lookups
//!
//! [`postgres`] implements both on top of sqlx.

pub mod postgres;

use crate::batch::{Batch, SqlValue};
use crate::retry::FailureClass;
use crate::schema::TableSpec;
use async_trait::async_trait;
use thiserror::Error;
use yelp_common::Result;

pub use postgres::{PgConnectionPool, PgTableWriter};

/// SQLSTATE codes for failures that disappear when the transaction is replayed.
const LOCK_CONFLICT_CODES: &[&str] = &[
    "40P01", // deadlock_detected
    "40001", // serialization_failure
    "55P03", // lock_not_available
];

/// Failure of a single write or lookup attempt.
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("lock conflict (SQLSTATE {code}): {message}")]
    LockConflict { code: String, message: String },

    #[error(transparent)]
    Database(sqlx::Error),
}

impl WriteError {
    pub fn class(&self) -> FailureClass {
        match self {
            WriteError::LockConflict { .. } => FailureClass::Transient,
            WriteError::Database(err) if is_programming_error(err) => FailureClass::Fatal,
            WriteError::Database(_) => FailureClass::Persistent,
        }
    }
}

impl From<sqlx::Error> for WriteError {
    fn from(err: sqlx::Error) -> Self {
        let conflict = err.as_database_error().and_then(|db| {
            let code = db.code()?;
            LOCK_CONFLICT_CODES
                .contains(&&*code)
                .then(|| (code.into_owned(), db.message().to_string()))
        });

        match conflict {
            Some((code, message)) => WriteError::LockConflict { code, message },
            None => WriteError::Database(err),
        }
    }
}

fn is_programming_error(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Configuration(_)
            | sqlx::Error::Decode(_)
            | sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::ColumnIndexOutOfBounds { .. }
            | sqlx::Error::TypeNotFound { .. }
    )
}

/// An exclusively owned database connection.
#[async_trait]
pub trait TableWriter: Send {
    /// Insert every row of `batch` in one transaction, skipping rows that hit
    /// the table's conflict key. Returns the number of rows inserted.
    ///
    /// On failure the transaction is rolled back before returning.
    async fn write_batch(&mut self, batch: &Batch) -> std::result::Result<u64, WriteError>;

    /// Fetch the surrogate key `id_column` of the row matching every `key`
    /// column, if there is one.
    async fn find_id(
        &mut self,
        table: &TableSpec,
        id_column: &str,
        key: &[(&'static str, SqlValue)],
    ) -> std::result::Result<Option<i64>, WriteError>;
}

/// A bounded supply of [`TableWriter`] handles.
#[async_trait]
pub trait ConnectionSource: Send + Sync + 'static {
    type Handle: TableWriter + 'static;

    /// Wait for a free connection.
    async fn acquire(&self) -> Result<Self::Handle>;

    /// Return a handle early. Dropping the handle has the same effect.
    fn release(&self, handle: Self::Handle) {
        drop(handle);
    }
}
