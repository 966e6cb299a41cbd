//! Worker coordinator
//!
//! Runs one dataset through its phase plan:
//! 1. Split the records into one contiguous partition per worker
//! 2. Spawn the workers; each acquires its own connection and walks the plan
//! 3. Join every worker and fold their reports into a [`DatasetSummary`]
//!
//! Workers share a single [`WorkerContext`]: the phase barrier, the flush lock,
//! the progress counter and the upserter. A failed worker poisons the barrier
//! so its siblings stop at their next fence instead of waiting forever.

use crate::barrier::PhaseBarrier;
use crate::batch::Batch;
use crate::config::{default_workers, resolve_workers};
use crate::datasets::{DatasetKind, DatasetProtocol, PassProgress, TransformContext};
use crate::db::ConnectionSource;
use crate::partition::{partition, Partition};
use crate::phase::{PhasePlan, Step};
use crate::progress::ProgressReporter;
use crate::retry::RetryPolicy;
use crate::source::Dataset;
use crate::upsert::BatchUpserter;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info};
use yelp_common::{LoaderError, Result};

/// Knobs for a coordinator run.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Requested worker count. Raised to the minimum when lower.
    pub workers: usize,
    pub retry: RetryPolicy,
    /// Longest a worker may wait at a fence. `None` waits indefinitely.
    pub barrier_timeout: Option<Duration>,
    pub show_progress: bool,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            retry: RetryPolicy::default(),
            barrier_timeout: None,
            show_progress: true,
        }
    }
}

/// What one worker wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub index: usize,
    pub records: usize,
    /// Rows actually inserted, per table.
    pub rows_by_table: BTreeMap<&'static str, u64>,
    pub orphans: u64,
}

impl WorkerReport {
    fn new(index: usize, records: usize) -> Self {
        Self {
            index,
            records,
            ..Self::default()
        }
    }
}

/// Outcome of one dataset run.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetSummary {
    pub kind: DatasetKind,
    pub records: usize,
    pub workers: usize,
    pub rows_by_table: BTreeMap<&'static str, u64>,
    pub orphans: u64,
    pub elapsed: Duration,
}

impl DatasetSummary {
    fn from_reports(
        kind: DatasetKind,
        records: usize,
        workers: usize,
        reports: Vec<WorkerReport>,
        elapsed: Duration,
    ) -> Self {
        let mut rows_by_table = BTreeMap::new();
        let mut orphans = 0;
        for report in reports {
            orphans += report.orphans;
            for (table, rows) in report.rows_by_table {
                *rows_by_table.entry(table).or_insert(0) += rows;
            }
        }
        Self {
            kind,
            records,
            workers,
            rows_by_table,
            orphans,
            elapsed,
        }
    }

    /// Rows inserted into `table`, zero when the run never touched it.
    pub fn rows(&self, table: &str) -> u64 {
        self.rows_by_table.get(table).copied().unwrap_or(0)
    }

    pub fn total_rows(&self) -> u64 {
        self.rows_by_table.values().sum()
    }
}

/// State shared by every worker of one run.
struct WorkerContext<S> {
    pool: Arc<S>,
    barrier: PhaseBarrier,
    flush_lock: Mutex<()>,
    progress: ProgressReporter,
    upserter: BatchUpserter,
}

/// Drives datasets through their phase plans with a fixed set of workers.
pub struct WorkerCoordinator<S> {
    pool: Arc<S>,
    settings: CoordinatorSettings,
}

impl<S: ConnectionSource> WorkerCoordinator<S> {
    pub fn new(pool: Arc<S>, mut settings: CoordinatorSettings) -> Self {
        settings.workers = resolve_workers(settings.workers);
        Self { pool, settings }
    }

    /// Effective worker count. Also the number of barrier parties and the
    /// number of connections a run holds at once.
    pub fn workers(&self) -> usize {
        self.settings.workers
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    /// Load `dataset` with `protocol`.
    ///
    /// Returns once every worker has finished. When workers fail, the first
    /// root cause is returned in preference to the barrier errors its siblings
    /// saw as a consequence.
    pub async fn run<P: DatasetProtocol>(
        &self,
        protocol: P,
        dataset: Dataset<P::Record>,
    ) -> Result<DatasetSummary> {
        let started = Instant::now();
        let kind = protocol.kind();
        let plan = protocol.plan();
        let workers = self.settings.workers;
        let records = dataset.len();
        let total = records as u64;

        let partitions = partition(dataset.into_records(), workers)?;
        let context = Arc::new(WorkerContext {
            pool: self.pool.clone(),
            barrier: PhaseBarrier::new(workers, self.settings.barrier_timeout),
            flush_lock: Mutex::new(()),
            progress: ProgressReporter::new(self.settings.show_progress),
            upserter: BatchUpserter::new(self.settings.retry.clone()),
        });

        if let Some(first) = plan.passes.first() {
            context.progress.start_phase(first.label, total);
        }

        info!(
            dataset = %kind,
            records,
            workers,
            fences = plan.fence_count(),
            "Starting workers"
        );

        let protocol = Arc::new(protocol);
        let handles: Vec<_> = partitions
            .into_iter()
            .map(|part| {
                let context = context.clone();
                let protocol = protocol.clone();
                tokio::spawn(run_worker(context, protocol, part, total))
            })
            .collect();

        let outcomes = join_all(handles).await;
        context.progress.finish();

        let mut reports = Vec::with_capacity(workers);
        let mut root_cause = None;
        let mut secondary = None;
        for (index, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok(Ok(report)) => reports.push(report),
                Ok(Err(err)) if err.is_secondary() => {
                    secondary.get_or_insert(err);
                },
                Ok(Err(err)) => {
                    root_cause.get_or_insert(err);
                },
                Err(join_err) => {
                    root_cause.get_or_insert(LoaderError::Worker(format!(
                        "worker {index} did not finish: {join_err}"
                    )));
                },
            }
        }

        if let Some(err) = root_cause.or(secondary) {
            error!(dataset = %kind, error = %err, "Dataset load failed");
            return Err(err);
        }

        let summary =
            DatasetSummary::from_reports(kind, records, workers, reports, started.elapsed());
        info!(
            dataset = %kind,
            records,
            rows = summary.total_rows(),
            orphans = summary.orphans,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Dataset loaded"
        );
        Ok(summary)
    }
}

/// Poisons the barrier if the worker future is dropped before it finishes,
/// which covers both panics and cancellation.
struct PoisonGuard<'a> {
    barrier: &'a PhaseBarrier,
    worker: usize,
    armed: bool,
}

impl<'a> PoisonGuard<'a> {
    fn new(barrier: &'a PhaseBarrier, worker: usize) -> Self {
        Self {
            barrier,
            worker,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PoisonGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.barrier
                .poison(format!("worker {} stopped unexpectedly", self.worker));
        }
    }
}

async fn run_worker<S, P>(
    context: Arc<WorkerContext<S>>,
    protocol: Arc<P>,
    part: Partition<P::Record>,
    total: u64,
) -> Result<WorkerReport>
where
    S: ConnectionSource,
    P: DatasetProtocol,
{
    let index = part.index;
    let guard = PoisonGuard::new(&context.barrier, index);
    let result = drive(&context, protocol.as_ref(), &part, total).await;
    guard.disarm();

    if let Err(err) = &result {
        if !err.is_secondary() {
            error!(worker = index, error = %err, "Worker failed");
        }
        context.barrier.poison(format!("worker {index} failed: {err}"));
    }
    result
}

/// Acquire a connection, walk the plan, and hand the connection back whether
/// or not the walk succeeded.
async fn drive<S, P>(
    context: &WorkerContext<S>,
    protocol: &P,
    part: &Partition<P::Record>,
    total: u64,
) -> Result<WorkerReport>
where
    S: ConnectionSource,
    P: DatasetProtocol,
{
    let mut report = WorkerReport::new(part.index, part.len());
    let mut conn = Some(context.pool.acquire().await?);
    debug!(worker = part.index, records = part.len(), "Connection acquired");

    let outcome = walk_plan(context, protocol, part, total, &mut conn, &mut report).await;

    if let Some(handle) = conn.take() {
        context.pool.release(handle);
    }
    outcome.map(|()| report)
}

async fn walk_plan<S, P>(
    context: &WorkerContext<S>,
    protocol: &P,
    part: &Partition<P::Record>,
    total: u64,
    conn: &mut Option<S::Handle>,
    report: &mut WorkerReport,
) -> Result<()>
where
    S: ConnectionSource,
    P: DatasetProtocol,
{
    let plan = protocol.plan();
    let worker = part.index;
    let mut batches: Vec<Batch> = Vec::new();

    for step in plan.steps() {
        match step {
            Step::Transform { pass } => {
                let handle = conn.as_mut().ok_or_else(released)?;
                let mut cx = TransformContext {
                    conn: handle,
                    upserter: &context.upserter,
                    progress: PassProgress::new(&context.progress, worker == 0),
                    orphans: 0,
                };
                batches = protocol.transform(pass, &part.records, &mut cx).await?;
                report.orphans += cx.orphans;
                check_batches(plan, pass, &batches)?;
                debug!(
                    worker,
                    pass,
                    rows = batches.iter().map(Batch::len).sum::<usize>(),
                    "Pass transformed"
                );
            },
            Step::Flush { pass, table } => {
                let batch = batches.get(table).ok_or_else(|| {
                    LoaderError::Worker(format!("pass {pass} produced no batch {table}"))
                })?;
                let handle = conn.as_mut().ok_or_else(released)?;
                let inserted = {
                    let _flush = context.flush_lock.lock().await;
                    context.upserter.upsert(handle, batch).await?
                };
                *report.rows_by_table.entry(batch.table().name).or_insert(0) += inserted;
                debug!(
                    worker,
                    table = batch.table().name,
                    rows = batch.len(),
                    inserted,
                    "Batch flushed"
                );
            },
            Step::Fence {
                next_pass: Some(next),
            } => {
                let label = plan.passes[next].label;
                let progress = &context.progress;
                context
                    .barrier
                    .wait_then(|| progress.start_phase(label, total))
                    .await?;
            },
            Step::Fence { next_pass: None } => {
                context.barrier.wait().await?;
            },
            Step::Release => {
                if let Some(handle) = conn.take() {
                    context.pool.release(handle);
                    debug!(worker, "Connection released");
                }
            },
        }
    }
    Ok(())
}

fn released() -> LoaderError {
    LoaderError::Worker("connection used after release".to_string())
}

/// Transforms must return one batch per table of the pass, in flush order.
fn check_batches(plan: &PhasePlan, pass: usize, batches: &[Batch]) -> Result<()> {
    let tables = plan.passes[pass].tables;
    if batches.len() != tables.len() {
        return Err(LoaderError::Worker(format!(
            "pass {pass} produced {} batches for {} tables",
            batches.len(),
            tables.len()
        )));
    }
    for (batch, table) in batches.iter().zip(tables) {
        if batch.table().name != table.name {
            return Err(LoaderError::InvalidBatch {
                table: table.name.to_string(),
                message: format!("got a batch for {}", batch.table().name),
            });
        }
    }
    Ok(())
}
