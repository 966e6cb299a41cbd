//! Splits a dataset into contiguous per-worker partitions.

use yelp_common::{LoaderError, Result};

/// One worker's exclusive share of a dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition<T> {
    pub index: usize,
    pub records: Vec<T>,
}

impl<T> Partition<T> {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Split `records` into exactly `worker_count` contiguous partitions.
///
/// With `N` records and `W` workers, the first `N % W` partitions hold
/// `N / W + 1` records and the rest hold `N / W`. Concatenating the partitions
/// by index gives back the input order. Partitions may be empty when `N < W`.
pub fn partition<T>(records: Vec<T>, worker_count: usize) -> Result<Vec<Partition<T>>> {
    if worker_count == 0 {
        return Err(LoaderError::Config(
            "cannot partition records across zero workers".to_string(),
        ));
    }

    let total = records.len();
    let chunk = total / worker_count;
    let remainder = total % worker_count;

    let mut partitions = Vec::with_capacity(worker_count);
    let mut rest = records.into_iter();
    for index in 0..worker_count {
        let size = if index < remainder { chunk + 1 } else { chunk };
        partitions.push(Partition {
            index,
            records: rest.by_ref().take(size).collect(),
        });
    }

    Ok(partitions)
}
