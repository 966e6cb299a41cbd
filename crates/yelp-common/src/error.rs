//! Error types for the Yelp loader

use std::error::Error as StdError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Boxed source error carried by database failures
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Result type alias for loader operations
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Main error type for the loader
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("IO error reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error in {} at line {line}: {message}", path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Connection pool not created")]
    PoolNotInitialized,

    #[error("Deadlock on {table} persisted after {attempts} attempts")]
    DeadlockExceeded { table: String, attempts: u32 },

    #[error("Database error on {target} after {attempts} attempt(s): {source}")]
    Database {
        target: String,
        attempts: u32,
        #[source]
        source: BoxError,
    },

    #[error("Invalid batch for {table}: {message}")]
    InvalidBatch { table: String, message: String },

    #[error("Phase barrier poisoned: {0}")]
    BarrierPoisoned(String),

    #[error("Phase barrier wait exceeded {0:?}")]
    BarrierTimeout(Duration),

    #[error("Worker failure: {0}")]
    Worker(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl LoaderError {
    /// Wrap a driver error raised while working on `target`.
    pub fn database(
        target: impl Into<String>,
        attempts: u32,
        source: impl Into<BoxError>,
    ) -> Self {
        LoaderError::Database {
            target: target.into(),
            attempts,
            source: source.into(),
        }
    }

    /// True for errors that only report a sibling's failure.
    pub fn is_secondary(&self) -> bool {
        matches!(self, LoaderError::BarrierPoisoned(_))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_names_file_and_line() {
        let err = LoaderError::Parse {
            path: PathBuf::from("yelp_business.JSON"),
            line: 7,
            message: "missing field `business_id`".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Parse error in yelp_business.JSON at line 7: missing field `business_id`"
        );
    }

    #[test]
    fn test_database_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let err = LoaderError::database("review", 3, io);

        assert!(err.to_string().contains("review after 3 attempt(s)"));
        assert!(err.source().is_some());
        assert!(!err.is_secondary());
    }

    #[test]
    fn test_poisoned_barrier_is_secondary() {
        let err = LoaderError::BarrierPoisoned("worker 1 failed".into());
        assert!(err.is_secondary());
    }
}
