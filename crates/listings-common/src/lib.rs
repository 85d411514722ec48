//! Listings Common Library
//!
//! Shared types, utilities, and error handling for the listings pipeline.
//!
//! # Overview
//!
//! - **Error Handling**: [`ListingsError`] and the [`Result`] alias
//! - **Fingerprints**: deterministic SHA-256 keys for cache entries and staged files
//! - **Logging**: `tracing` subscriber setup shared by every binary
//! - **Types**: [`SourceLocation`] and the [`DatasetReference`] derived from it
//!
//! # Example
//!
//! ```no_run
//! use listings_common::{DatasetReference, SourceLocation};
//!
//! let location = SourceLocation::new(
//!     "http://data.insideairbnb.com/the-netherlands/north-holland/amsterdam/2023-03-09/data/listings.csv.gz",
//! );
//! let dataset = DatasetReference::from_location(&location, "http://data.insideairbnb.com/");
//! assert_eq!(
//!     dataset.as_str(),
//!     "the-netherlands-north-holland-amsterdam-2023-03-09-data-listings.csv.gz"
//! );
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod error;
pub mod fingerprint;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{ListingsError, Result};
pub use fingerprint::Fingerprint;
pub use types::{DatasetReference, SourceLocation};
