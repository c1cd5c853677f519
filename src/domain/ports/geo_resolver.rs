//! GeoIP Resolver Port
//!
//! Defines the interface for resolving IP addresses to geographic locations.

use crate::domain::entities::LocationRecord;

/// Resolver for IP address to geographic location.
///
/// This is an outbound port that abstracts the offline GeoIP database.
/// One instance is shared read-only by every worker of a batch, so
/// implementations must support concurrent lookups without reopening.
pub trait GeoResolver: Send + Sync {
    /// Resolve a textual IP address to a location record.
    ///
    /// Returns None when the address is unknown, has no country, or is not
    /// a valid IPv4/IPv6 address. A miss is a normal outcome, never an error.
    fn resolve(&self, ip: &str) -> Option<LocationRecord>;
}
