//! Error handling for querier.
//!
//! This module provides:
//! - The crate-wide [`QuerierError`] taxonomy (credentials, authentication,
//!   connection, filter, aggregation, result and configuration errors)
//! - Classification of MongoDB driver errors into that taxonomy
//! - Structured JSON rendering of store-side failures
//!
//! # Example
//!
//! ```rust
//! use querier::error::{FilterError, QuerierError, Result};
//! use querier::Filter;
//!
//! fn build() -> Result<Filter> {
//!     let mut filter = Filter::new();
//!     filter.greater_than("favorite_count", 500)?;
//!     Ok(filter)
//! }
//!
//! assert!(build().is_ok());
//! let err = Filter::new().equals("", 1).unwrap_err();
//! assert!(matches!(err, QuerierError::Filter(FilterError::InvalidFieldPath(_))));
//! ```

pub mod kinds;
pub mod mongo;

// Re-export commonly used types
pub use kinds::{
    AggregationError, AuthenticationError, ConfigError, ConnectionError, CredentialsError,
    FilterError, QuerierError, Result, ResultError,
};
pub use mongo::{ErrorInfo, classify, is_unauthorized};
