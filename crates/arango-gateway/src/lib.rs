//! # ArangoDB Gateway
//!
//! Database access layer over ArangoDB:
//!
//! - [`Gateway`]: owns the primary and slow connections and one handle per
//!   collection; fans `finish_operations`/`drop_cached_db_info` out to them
//! - [`ChangeFeedListener`]: follows the change feed and restarts itself after
//!   a fixed delay whenever the feed fails
//! - [`QueryExecutor`]: cleans, logs and classifies query failures
//!
//! ## Usage
//!
//! ```rust,ignore
//! let config = GatewayConfig::load(Some("gateway.toml"))?;
//! let gateway = Gateway::new(config, &BasicCollectionFactory)?;
//! gateway.start().await?;
//!
//! let rows = gateway.query("FOR b IN blocks LIMIT 10 RETURN b", Map::new()).await?;
//! ```

pub mod arango_client;
pub mod collection;
pub mod feed;
pub mod gateway;
pub mod listener;
pub mod query;

#[cfg(test)]
pub(crate) mod test_support;

pub use arango_client::*;
pub use collection::*;
pub use feed::*;
pub use gateway::*;
pub use listener::*;
pub use query::*;
