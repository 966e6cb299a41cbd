//! PostgreSQL connection pool and batch writer.

use super::{ConnectionSource, TableWriter, WriteError};
use crate::batch::{Batch, SqlValue};
use crate::config::DatabaseConfig;
use crate::schema::TableSpec;
use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgPoolOptions;
use sqlx::query_builder::Separated;
use sqlx::{Connection, PgPool, Postgres, QueryBuilder, Row};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info, warn};
use yelp_common::{LoaderError, Result};

/// Postgres accepts at most this many bind parameters per statement.
const MAX_BIND_PARAMS: usize = 65_535;

/// Connection pool that is created empty and connected once by
/// [`initialize`](PgConnectionPool::initialize).
pub struct PgConnectionPool {
    config: DatabaseConfig,
    page_size: usize,
    pool: OnceLock<PgPool>,
}

impl PgConnectionPool {
    pub fn new(config: DatabaseConfig, page_size: usize) -> Self {
        Self {
            config,
            page_size: page_size.max(1),
            pool: OnceLock::new(),
        }
    }

    /// Wrap an already connected pool.
    pub fn from_pool(pool: PgPool, page_size: usize) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(pool);
        Self {
            config: DatabaseConfig::default(),
            page_size: page_size.max(1),
            pool: cell,
        }
    }

    /// Connect with room for `size` concurrent handles.
    ///
    /// Calling this again after a successful initialization is a no-op.
    pub async fn initialize(&self, size: u32) -> Result<()> {
        if self.pool.get().is_some() {
            debug!("Connection pool already initialized");
            return Ok(());
        }

        let pool = PgPoolOptions::new()
            .max_connections(size.max(1))
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(self.config.connect_timeout_secs))
            .connect(&self.config.url)
            .await
            .map_err(|e| LoaderError::database("pool connect", 1, e))?;

        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .map_err(|e| LoaderError::database("health check", 1, e))?;

        info!(
            max_connections = size,
            min_connections = 1,
            "Database connection pool created"
        );

        if self.pool.set(pool).is_err() {
            debug!("Connection pool initialized concurrently; keeping the first");
        }
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.pool.get().is_some()
    }

    /// The underlying sqlx pool, once initialized.
    pub fn pool(&self) -> Result<&PgPool> {
        self.pool.get().ok_or(LoaderError::PoolNotInitialized)
    }

    pub async fn close(&self) {
        if let Some(pool) = self.pool.get() {
            pool.close().await;
        }
    }
}

#[async_trait]
impl ConnectionSource for PgConnectionPool {
    type Handle = PgTableWriter;

    async fn acquire(&self) -> Result<PgTableWriter> {
        let conn = self
            .pool()?
            .acquire()
            .await
            .map_err(|e| LoaderError::database("pool acquire", 1, e))?;
        Ok(PgTableWriter {
            conn,
            page_size: self.page_size,
        })
    }
}

/// A pooled connection. Returned to the pool when dropped.
pub struct PgTableWriter {
    conn: PoolConnection<Postgres>,
    page_size: usize,
}

fn rows_per_statement(page_size: usize, columns: usize) -> usize {
    page_size.min(MAX_BIND_PARAMS / columns.max(1)).max(1)
}

#[async_trait]
impl TableWriter for PgTableWriter {
    async fn write_batch(&mut self, batch: &Batch) -> std::result::Result<u64, WriteError> {
        let page_rows = rows_per_statement(self.page_size, batch.columns().len());
        let mut tx = self.conn.begin().await?;
        let mut inserted = 0;

        for page in batch.rows().chunks(page_rows) {
            let mut query = insert_statement(batch.table(), batch.columns(), page);
            match query.build().execute(&mut *tx).await {
                Ok(done) => inserted += done.rows_affected(),
                Err(err) => {
                    if let Err(rollback) = tx.rollback().await {
                        warn!(table = batch.table().name, error = %rollback, "Rollback failed");
                    }
                    return Err(err.into());
                },
            }
        }

        tx.commit().await?;
        debug!(table = batch.table().name, rows = batch.len(), inserted, "Batch committed");
        Ok(inserted)
    }

    async fn find_id(
        &mut self,
        table: &TableSpec,
        id_column: &str,
        key: &[(&'static str, SqlValue)],
    ) -> std::result::Result<Option<i64>, WriteError> {
        let mut query = lookup_statement(table, id_column, key);
        let row = query.build().fetch_optional(&mut *self.conn).await?;
        match row {
            Some(row) => Ok(Some(row.try_get::<i64, _>(0)?)),
            None => Ok(None),
        }
    }
}

/// `INSERT INTO t (cols) VALUES (...), ... [ON CONFLICT (keys) DO NOTHING]`
pub fn insert_statement<'args>(
    table: &TableSpec,
    columns: &[&str],
    rows: &'args [Vec<SqlValue>],
) -> QueryBuilder<'args, Postgres> {
    let mut query = QueryBuilder::new("INSERT INTO ");
    query.push(table.name).push(" (");
    {
        let mut names = query.separated(", ");
        for column in columns {
            names.push(column);
        }
    }
    query.push(") ");

    query.push_values(rows, |mut tuple, row| {
        for value in row {
            bind_value(&mut tuple, value);
        }
    });

    if !table.conflict_columns.is_empty() {
        query
            .push(" ON CONFLICT (")
            .push(table.conflict_columns.join(", "))
            .push(") DO NOTHING");
    }
    query
}

/// `SELECT id::bigint FROM t WHERE k1 = $1 AND k2 = $2 LIMIT 1`
pub fn lookup_statement<'args>(
    table: &TableSpec,
    id_column: &str,
    key: &'args [(&'static str, SqlValue)],
) -> QueryBuilder<'args, Postgres> {
    let mut query = QueryBuilder::new("SELECT ");
    query
        .push(id_column)
        .push("::bigint FROM ")
        .push(table.name)
        .push(" WHERE ");
    for (position, (column, value)) in key.iter().enumerate() {
        if position > 0 {
            query.push(" AND ");
        }
        query.push(column).push(" = ");
        match value {
            SqlValue::Text(text) => query.push_bind(text.as_str()),
            SqlValue::Int(number) => query.push_bind(*number),
            SqlValue::Float(number) => query.push_bind(*number),
            SqlValue::Date(date) => query.push_bind(*date),
        };
    }
    query.push(" LIMIT 1");
    query
}

/// Bind one tuple cell, preceded by the tuple separator.
fn bind_value<'qb, 'args>(
    target: &mut Separated<'qb, 'args, Postgres, &'static str>,
    value: &'args SqlValue,
) {
    match value {
        SqlValue::Text(text) => target.push_bind(text.as_str()),
        SqlValue::Int(number) => target.push_bind(*number),
        SqlValue::Float(number) => target.push_bind(*number),
        SqlValue::Date(date) => target.push_bind(*date),
    };
}
