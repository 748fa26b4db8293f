//! Querier Library
//!
//! Query construction and credential resolution over MongoDB. Callers name
//! a logical database, describe what they want with a [`Filter`] or an
//! [`AggregationBuilder`], and read records lazily from a [`QueryResult`].
//!
//! # Modules
//!
//! - `aggregation`: Group-by pipelines with named outputs
//! - `config`: Configuration management and logging setup
//! - `connection`: Connections, collection views and query dispatch
//! - `credentials`: Credentials file parsing and database name resolution
//! - `error`: Error types and handling
//! - `filter`: Conjunctive filters with disjunction and geo support
//! - `result`: Lazily iterated results
//!
//! # Example
//!
//! ```no_run
//! use querier::{Config, Connection, ExtractOptions, Filter};
//!
//! #[tokio::main]
//! async fn main() -> querier::Result<()> {
//!     let config = Config::load()?;
//!     querier::init_logging(&config.logging)?;
//!
//!     let con = Connection::open("twitter_2020", &config).await?;
//!
//!     let mut filter = Filter::new();
//!     filter.equals("lang", "es")?.greater_than("retweet_count", 10)?;
//!
//!     let options = ExtractOptions::new().fields(["id", "text"]);
//!     let mut result = con.extract(&filter, options).await?;
//!     while let Some(record) = result.try_next().await? {
//!         println!("{record}");
//!     }
//!
//!     con.close().await;
//!     Ok(())
//! }
//! ```

pub mod aggregation;
pub mod config;
pub mod connection;
pub mod credentials;
pub mod error;
pub mod filter;
pub mod result;

// Re-export commonly used types
pub use aggregation::{AggFunction, AggregationBuilder, NamedAgg};
pub use config::{Config, init_logging};
pub use connection::{CollectionView, Connection, ConnectionState, ExtractOptions, GroupBy};
pub use credentials::{CredentialStore, ResolvedTarget};
pub use error::{QuerierError, Result};
pub use filter::{Filter, GeoType, Geometry, Point};
pub use result::{Direction, QueryResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library version
pub fn version() -> &'static str {
    VERSION
}
