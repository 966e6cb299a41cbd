//! Dataset pipeline
//!
//! Loads the four Yelp files in dependency order, running each one through the
//! [`WorkerCoordinator`] before the next is read. A failed dataset stops the
//! pipeline; later datasets would only trip over the missing references.

use crate::coordinator::{DatasetSummary, WorkerCoordinator};
use crate::datasets::{
    BusinessProtocol, CheckinProtocol, DatasetFiles, DatasetKind, DatasetProtocol,
    ReviewProtocol, UserProtocol,
};
use crate::db::ConnectionSource;
use crate::source::load_dataset;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::time::Instant;
use tracing::{info, instrument};
use yelp_common::{LoaderError, Result};

pub struct DatasetPipeline<S> {
    coordinator: WorkerCoordinator<S>,
}

impl<S: ConnectionSource> DatasetPipeline<S> {
    pub fn new(coordinator: WorkerCoordinator<S>) -> Self {
        Self { coordinator }
    }

    pub fn coordinator(&self) -> &WorkerCoordinator<S> {
        &self.coordinator
    }

    /// Load every kind in `kinds`, always in [`DatasetKind::LOAD_ORDER`]
    /// whatever order they were given in. An empty slice loads everything.
    pub async fn run(
        &self,
        files: &DatasetFiles,
        kinds: &[DatasetKind],
    ) -> Result<Vec<DatasetSummary>> {
        let started = Instant::now();
        let selected: Vec<DatasetKind> = DatasetKind::LOAD_ORDER
            .into_iter()
            .filter(|kind| kinds.is_empty() || kinds.contains(kind))
            .collect();

        let mut summaries = Vec::with_capacity(selected.len());
        for kind in selected {
            summaries.push(self.load(kind, files.path(kind)).await?);
        }

        info!(
            datasets = summaries.len(),
            rows = summaries.iter().map(DatasetSummary::total_rows).sum::<u64>(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Pipeline complete"
        );
        Ok(summaries)
    }

    /// Parse one file and load it with the protocol for `kind`.
    #[instrument(skip(self, path), fields(path = %path.display()))]
    pub async fn load(&self, kind: DatasetKind, path: &Path) -> Result<DatasetSummary> {
        match kind {
            DatasetKind::Business => self.load_with(BusinessProtocol, path).await,
            DatasetKind::User => self.load_with(UserProtocol, path).await,
            DatasetKind::Review => self.load_with(ReviewProtocol, path).await,
            DatasetKind::Checkin => self.load_with(CheckinProtocol, path).await,
        }
    }

    async fn load_with<P>(&self, protocol: P, path: &Path) -> Result<DatasetSummary>
    where
        P: DatasetProtocol,
        P::Record: DeserializeOwned,
    {
        let label = protocol.kind().label();
        let owned = path.to_path_buf();
        let dataset = tokio::task::spawn_blocking(move || load_dataset::<P::Record>(&owned, label))
            .await
            .map_err(|err| LoaderError::Worker(format!("reading {label} failed: {err}")))??;

        self.coordinator.run(protocol, dataset).await
    }
}
