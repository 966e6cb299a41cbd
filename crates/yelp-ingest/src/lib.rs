//! Yelp Ingest Library
//!
//! Bulk loader for the Yelp academic dataset: newline-delimited JSON files
//! are split across a fixed set of workers, transformed into table batches,
//! and written to Postgres with conflict-skipping inserts.
//!
//! # Datasets
//!
//! - **Business**: businesses, categories, category links and opening hours
//! - **User**: users, then the friend graph
//! - **Review**: reviews
//! - **Checkin**: check-in days, then hourly counts keyed by day id
//!
//! Multi-table datasets are fenced with a [`barrier::PhaseBarrier`] so no
//! worker writes rows whose references another worker has not committed yet.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use yelp_ingest::config::IngestConfig;
//! use yelp_ingest::coordinator::WorkerCoordinator;
//! use yelp_ingest::datasets::{DatasetFiles, DatasetKind};
//! use yelp_ingest::db::PgConnectionPool;
//! use yelp_ingest::pipeline::DatasetPipeline;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::load()?;
//!     let pool = Arc::new(PgConnectionPool::new(config.database.clone(), config.page_size));
//!     pool.initialize(config.worker_count() as u32).await?;
//!
//!     let pipeline = DatasetPipeline::new(WorkerCoordinator::new(
//!         pool,
//!         config.coordinator_settings(),
//!     ));
//!     pipeline
//!         .run(&DatasetFiles::in_dir("../yelpInput"), &DatasetKind::LOAD_ORDER)
//!         .await?;
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod barrier;
pub mod batch;
pub mod config;
pub mod coordinator;
pub mod datasets;
pub mod db;
pub mod partition;
pub mod phase;
pub mod pipeline;
pub mod progress;
pub mod records;
pub mod retry;
pub mod schema;
pub mod source;
pub mod upsert;

pub use barrier::PhaseBarrier;
pub use config::IngestConfig;
pub use coordinator::{CoordinatorSettings, DatasetSummary, WorkerCoordinator};
pub use datasets::{DatasetFiles, DatasetKind};
pub use pipeline::DatasetPipeline;
pub use yelp_common::{LoaderError, Result};
