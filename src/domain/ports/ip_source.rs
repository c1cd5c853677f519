//! Distinct-IP Source Port
//!
//! Defines the interface for streaming deduplicated IP addresses out of the
//! document store. Deduplication happens server-side; callers only ever
//! see a lazy stream of address strings.

use async_trait::async_trait;
use futures::stream::BoxStream;

/// Lazy stream of distinct IP addresses.
pub type IpStream = BoxStream<'static, Result<String, SourceError>>;

/// Errors raised by a distinct-IP source.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    #[error("source unreachable: {0}")]
    Connection(String),
    #[error("distinct query failed: {0}")]
    Query(String),
    #[error("invalid collection name {0:?}")]
    InvalidCollection(String),
}

impl SourceError {
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

/// What a successful connectivity check learned about the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceInfo {
    /// Server version string
    pub server_version: String,
    /// Collections (or tables) available in the configured database
    pub collections: Vec<String>,
}

/// Source of distinct IP addresses.
///
/// Connection lifecycle (open, ping, close) belongs to the adapter.
#[async_trait]
pub trait DistinctIpSource: Send + Sync {
    /// Check that the store is reachable.
    async fn ping(&self) -> Result<SourceInfo, SourceError>;

    /// Start a server-side distinct aggregation over the `ip` field of a
    /// collection.
    ///
    /// Each address appears at most once in the returned stream.
    async fn distinct_ips(&self, collection: &str) -> Result<IpStream, SourceError>;
}
