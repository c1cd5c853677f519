//! In-Memory GeoIP Resolver
//!
//! Implements GeoResolver over a DashMap table. Useful for fixtures and
//! for small static mappings that do not warrant an mmdb file.

use crate::domain::entities::LocationRecord;
use crate::domain::ports::GeoResolver;
use dashmap::DashMap;
use std::net::{AddrParseError, IpAddr};

/// DashMap-backed resolver keyed by parsed address.
///
/// Keys are parsed, so `::1` and `0:0:0:0:0:0:0:1` resolve to the same entry.
pub struct InMemoryGeoResolver {
    entries: DashMap<IpAddr, LocationRecord>,
}

impl InMemoryGeoResolver {
    /// Create an empty resolver.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Create a resolver preloaded with records (keyed by `record.ip`).
    pub fn from_records(
        records: impl IntoIterator<Item = LocationRecord>,
    ) -> Result<Self, AddrParseError> {
        let resolver = Self::new();
        for record in records {
            resolver.insert(record)?;
        }
        Ok(resolver)
    }

    /// Add or replace the entry for `record.ip`.
    pub fn insert(&self, record: LocationRecord) -> Result<(), AddrParseError> {
        let addr: IpAddr = record.ip.trim().parse()?;
        self.entries.insert(addr, record);
        Ok(())
    }
}

impl Default for InMemoryGeoResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl GeoResolver for InMemoryGeoResolver {
    fn resolve(&self, ip: &str) -> Option<LocationRecord> {
        let addr: IpAddr = match ip.trim().parse() {
            Ok(addr) => addr,
            Err(_) => {
                tracing::warn!("skipping malformed IP address {:?}", ip);
                return None;
            }
        };

        self.entries
            .get(&addr)
            .filter(|entry| !entry.country.is_empty())
            .map(|entry| entry.with_ip(ip))
    }
}
