//! Loads newline-delimited JSON files into typed in-memory datasets.

use serde::de::DeserializeOwned;
use serde_jsonlines::JsonLinesReader;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use yelp_common::{LoaderError, Result};

/// Every record of one input file, in file order.
#[derive(Debug, Clone)]
pub struct Dataset<T> {
    records: Vec<T>,
    source: Option<PathBuf>,
}

impl<T> Dataset<T> {
    pub fn from_records(records: Vec<T>) -> Self {
        Self {
            records,
            source: None,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[T] {
        &self.records
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn into_records(self) -> Vec<T> {
        self.records
    }
}

/// Read every line of `path` as a `T`.
///
/// The whole load fails on the first unreadable or malformed line; no partial
/// dataset is returned. `label` names the records in status messages
/// ("businesses", "users", ...).
pub fn load_dataset<T: DeserializeOwned>(path: &Path, label: &str) -> Result<Dataset<T>> {
    info!(path = %path.display(), "Parsing {label}...");

    let file = File::open(path).map_err(|source| LoaderError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = JsonLinesReader::new(BufReader::new(file));

    let mut records = Vec::new();
    loop {
        let line = records.len() + 1;
        match reader.read::<T>() {
            Ok(Some(record)) => records.push(record),
            Ok(None) => break,
            Err(err) => return Err(classify_read_error(path, line, err)),
        }
    }

    info!(path = %path.display(), count = records.len(), "{} {label} in memory.", records.len());
    Ok(Dataset {
        records,
        source: Some(path.to_path_buf()),
    })
}

/// `JsonLinesReader` reports decode failures as `InvalidData` io errors
/// wrapping the `serde_json::Error`.
fn classify_read_error(path: &Path, line: usize, err: io::Error) -> LoaderError {
    let decode = err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<serde_json::Error>())
        .map(ToString::to_string);

    match decode {
        Some(message) => {
            debug!(path = %path.display(), line, %message, "Rejected input line");
            LoaderError::Parse {
                path: path.to_path_buf(),
                line,
                message,
            }
        },
        None => LoaderError::Io {
            path: path.to_path_buf(),
            source: err,
        },
    }
}
