//! Yelp Loader Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling and logging for the Yelp dataset loader.
//!
//! # Overview
//!
//! - **Error Handling**: [`LoaderError`] and the crate-wide [`Result`] alias
//! - **Logging**: [`logging::LogConfig`] and [`logging::init_logging`]
//!
//! # Example
//!
//! ```no_run
//! use yelp_common::{LoaderError, Result};
//!
//! fn require_workers(count: usize) -> Result<usize> {
//!     if count == 0 {
//!         return Err(LoaderError::Config("worker count must be at least 1".into()));
//!     }
//!     Ok(count)
//! }
//! ```

pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{LoaderError, Result};
