//! Domain Entities - Core business objects
//!
//! These entities represent the values that flow through the resolution
//! pipeline. They have no external dependencies beyond serde.

use serde::{Deserialize, Serialize};

/// A bounded group of distinct IP addresses processed in one pass through
/// the worker pool.
///
/// IPs stay in their textual form; only resolvers parse them.
pub type Batch = Vec<String>;

/// Geographic location resolved for a single IP address.
///
/// Field order is the column order of the output table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocationRecord {
    /// IP address exactly as it appeared in the source
    pub ip: String,
    /// Country name (English)
    pub country: String,
    /// Country code (ISO 3166-1 alpha-2)
    pub country_code: String,
    /// First-level subdivision (state, province), empty if unknown
    pub region: String,
    /// City name, empty if unknown
    pub city: String,
}

impl LocationRecord {
    /// Header row of the output table.
    pub const COLUMNS: [&'static str; 5] = ["ip", "country", "country_code", "region", "city"];

    pub fn new(
        ip: impl Into<String>,
        country: impl Into<String>,
        country_code: impl Into<String>,
        region: impl Into<String>,
        city: impl Into<String>,
    ) -> Self {
        Self {
            ip: ip.into(),
            country: country.into(),
            country_code: country_code.into(),
            region: region.into(),
            city: city.into(),
        }
    }

    /// Same location, attributed to another address.
    pub fn with_ip(&self, ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            ..self.clone()
        }
    }
}
