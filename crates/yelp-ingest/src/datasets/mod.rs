//! Dataset kinds and their ingestion protocols.
//!
//! Each protocol names a [`PhasePlan`] and turns a partition of records into
//! the batches that plan flushes. The coordinator owns the ordering; protocols
//! only transform.

pub mod business;
pub mod checkin;
pub mod review;
pub mod user;

use crate::batch::Batch;
use crate::db::TableWriter;
use crate::phase::PhasePlan;
use crate::progress::ProgressReporter;
use crate::upsert::BatchUpserter;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use yelp_common::Result;

pub use business::BusinessProtocol;
pub use checkin::CheckinProtocol;
pub use review::ReviewProtocol;
pub use user::UserProtocol;

/// The four Yelp datasets, in load order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, clap::ValueEnum)]
pub enum DatasetKind {
    Business,
    User,
    Review,
    Checkin,
}

impl DatasetKind {
    /// Dependency order: reviews reference users and businesses, check-ins
    /// reference businesses.
    pub const LOAD_ORDER: [DatasetKind; 4] = [
        DatasetKind::Business,
        DatasetKind::User,
        DatasetKind::Review,
        DatasetKind::Checkin,
    ];

    /// Plural noun used in status lines.
    pub fn label(self) -> &'static str {
        match self {
            DatasetKind::Business => "businesses",
            DatasetKind::User => "users",
            DatasetKind::Review => "reviews",
            DatasetKind::Checkin => "checkins",
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            DatasetKind::Business => "yelp_business.JSON",
            DatasetKind::User => "yelp_user.JSON",
            DatasetKind::Review => "yelp_review.JSON",
            DatasetKind::Checkin => "yelp_checkin.JSON",
        }
    }
}

impl std::fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DatasetKind::Business => "business",
            DatasetKind::User => "user",
            DatasetKind::Review => "review",
            DatasetKind::Checkin => "checkin",
        };
        f.write_str(name)
    }
}

/// Input file locations for every dataset kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetFiles {
    pub business: PathBuf,
    pub user: PathBuf,
    pub review: PathBuf,
    pub checkin: PathBuf,
}

impl DatasetFiles {
    /// The standard file names inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            business: dir.join(DatasetKind::Business.file_name()),
            user: dir.join(DatasetKind::User.file_name()),
            review: dir.join(DatasetKind::Review.file_name()),
            checkin: dir.join(DatasetKind::Checkin.file_name()),
        }
    }

    pub fn path(&self, kind: DatasetKind) -> &Path {
        match kind {
            DatasetKind::Business => &self.business,
            DatasetKind::User => &self.user,
            DatasetKind::Review => &self.review,
            DatasetKind::Checkin => &self.checkin,
        }
    }
}

/// Progress hook handed to transforms. Only worker 0 redraws.
pub struct PassProgress<'a> {
    reporter: &'a ProgressReporter,
    designated: bool,
}

impl<'a> PassProgress<'a> {
    pub fn new(reporter: &'a ProgressReporter, designated: bool) -> Self {
        Self {
            reporter,
            designated,
        }
    }

    /// Count one processed record.
    pub fn tick(&self) {
        self.reporter.increment(1);
        if self.designated {
            self.reporter.render();
        }
    }
}

/// Everything a transform may use besides its records.
pub struct TransformContext<'a, W> {
    pub conn: &'a mut W,
    pub upserter: &'a BatchUpserter,
    pub progress: PassProgress<'a>,
    /// Rows dropped because a referenced row could not be found.
    pub orphans: u64,
}

#[async_trait]
pub trait DatasetProtocol: Send + Sync + 'static {
    type Record: Send + Sync + 'static;

    fn kind(&self) -> DatasetKind;

    fn plan(&self) -> &'static PhasePlan;

    /// Build the batches of `pass`, one per table of that pass and in the
    /// same order. Ticks progress once per record.
    async fn transform<W: TableWriter>(
        &self,
        pass: usize,
        records: &[Self::Record],
        cx: &mut TransformContext<'_, W>,
    ) -> Result<Vec<Batch>>;
}
