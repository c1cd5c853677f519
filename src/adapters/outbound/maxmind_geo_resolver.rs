//! MaxMind GeoIP Resolver
//!
//! Implements GeoResolver using a MaxMind GeoIP2/GeoLite2 City database.

use crate::domain::entities::LocationRecord;
use crate::domain::ports::GeoResolver;
use maxminddb::{MaxMindDBError, Reader};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

/// Language used for country, region and city names.
const NAME_LANG: &str = "en";

/// Errors raised while opening the GeoIP database.
#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    #[error("GeoIP database not found: {0}")]
    NotFound(String),
    #[error("failed to open GeoIP database {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: MaxMindDBError,
    },
}

#[derive(Debug, Default, Deserialize)]
struct Named {
    iso_code: Option<String>,
    names: Option<BTreeMap<String, String>>,
}

impl Named {
    fn name(&self) -> Option<&str> {
        self.names
            .as_ref()
            .and_then(|names| names.get(NAME_LANG))
            .map(String::as_str)
    }
}

#[derive(Debug, Default, Deserialize)]
struct CityResp {
    country: Option<Named>,
    subdivisions: Option<Vec<Named>>,
    city: Option<Named>,
}

impl CityResp {
    /// Build a record, or None when the country name is missing or empty.
    fn into_record(self, ip: &str) -> Option<LocationRecord> {
        let country = self.country?;
        let country_name = country.name().filter(|n| !n.is_empty())?.to_string();
        let country_code = country.iso_code.clone().unwrap_or_default();

        let region = self
            .subdivisions
            .as_deref()
            .and_then(|subs| subs.first())
            .and_then(Named::name)
            .unwrap_or_default()
            .to_string();

        let city = self
            .city
            .as_ref()
            .and_then(Named::name)
            .unwrap_or_default()
            .to_string();

        Some(LocationRecord::new(ip, country_name, country_code, region, city))
    }
}

/// MaxMind GeoIP resolver.
///
/// The database is read into memory once and shared behind an `Arc`,
/// so every worker queries the same reader without locking.
pub struct MaxMindGeoResolver {
    reader: Arc<Reader<Vec<u8>>>,
}

impl MaxMindGeoResolver {
    /// Load a GeoIP database from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ResolverError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ResolverError::NotFound(path.display().to_string()));
        }

        tracing::info!("loading GeoIP database {}", path.display());
        let reader = Reader::open_readfile(path).map_err(|source| ResolverError::Open {
            path: path.display().to_string(),
            source,
        })?;

        tracing::info!(
            "GeoIP database loaded: type={} build_epoch={}",
            reader.metadata.database_type,
            reader.metadata.build_epoch
        );

        Ok(Self {
            reader: Arc::new(reader),
        })
    }
}

impl GeoResolver for MaxMindGeoResolver {
    fn resolve(&self, ip: &str) -> Option<LocationRecord> {
        let addr: IpAddr = match ip.trim().parse() {
            Ok(addr) => addr,
            Err(_) => {
                tracing::warn!("skipping malformed IP address {:?}", ip);
                return None;
            }
        };

        let resp: CityResp = match self.reader.lookup(addr) {
            Ok(resp) => resp,
            Err(MaxMindDBError::AddressNotFoundError(_)) => return None,
            Err(e) => {
                tracing::warn!("GeoIP lookup failed for {}: {}", ip, e);
                return None;
            }
        };

        resp.into_record(ip)
    }
}
