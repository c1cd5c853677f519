use crate::application::pipeline::{PipelineOptions, DEFAULT_BATCH_SIZE, DEFAULT_COLLECTION};
use crate::application::scheduler::DEFAULT_MAX_WORKERS;
use serde::Deserialize;

/// Where distinct IPs are read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    MongoDb,
    Sqlite,
}

impl SourceKind {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_lowercase().as_str() {
            "mongodb" | "mongo" => Ok(Self::MongoDb),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(ConfigError::Invalid(format!(
                "IPGEO_SOURCE must be mongodb or sqlite, got {:?}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    // Source settings
    pub source: SourceKind,
    pub mongo_uri: String,
    pub mongo_db: String,
    pub sqlite_path: String,
    pub collection: String,

    // Pipeline settings
    pub batch_size: usize,
    pub max_workers: usize,

    // Lookup database and output
    pub geoip_path: String,
    pub output_path: String,

    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source: SourceKind::MongoDb,
            mongo_uri: "mongodb://localhost:27017".to_string(),
            mongo_db: "ipgeo".to_string(),
            sqlite_path: "ips.db".to_string(),
            collection: DEFAULT_COLLECTION.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            max_workers: DEFAULT_MAX_WORKERS,
            geoip_path: "GeoLite2-City.mmdb".to_string(),
            output_path: "data/ip_locations.csv".to_string(),
            debug: false,
        }
    }
}

impl Config {
    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("IPGEO_BATCH_SIZE must be at least 1".into()));
        }
        if self.max_workers == 0 {
            return Err(ConfigError::Invalid("IPGEO_MAX_WORKERS must be at least 1".into()));
        }
        if self.collection.trim().is_empty() {
            return Err(ConfigError::Invalid("IPGEO_COLLECTION must not be empty".into()));
        }
        Ok(())
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            collection: self.collection.clone(),
            batch_size: self.batch_size,
            max_workers: self.max_workers,
        }
    }
}

pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(|key| std::env::var(key).ok())
}

/// Build the configuration from an arbitrary variable lookup.
///
/// Unparsable numbers fall back to their defaults.
pub fn load_config_from<F>(var: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = Config::default();

    let source = match var("IPGEO_SOURCE") {
        Some(value) => SourceKind::parse(&value)?,
        None => defaults.source,
    };

    let mongo_uri = var("IPGEO_MONGO_URI").unwrap_or(defaults.mongo_uri);
    let mongo_db = var("IPGEO_MONGO_DB").unwrap_or(defaults.mongo_db);
    let sqlite_path = var("IPGEO_SQLITE_PATH").unwrap_or(defaults.sqlite_path);
    let collection = var("IPGEO_COLLECTION").unwrap_or(defaults.collection);

    let batch_size = var("IPGEO_BATCH_SIZE")
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(defaults.batch_size);

    let max_workers = var("IPGEO_MAX_WORKERS")
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(defaults.max_workers);

    let geoip_path = var("IPGEO_GEOIP_PATH").unwrap_or(defaults.geoip_path);
    let output_path = var("IPGEO_OUTPUT_PATH").unwrap_or(defaults.output_path);

    let debug = var("DEBUG").is_some();

    Ok(Config {
        source,
        mongo_uri,
        mongo_db,
        sqlite_path,
        collection,
        batch_size,
        max_workers,
        geoip_path,
        output_path,
        debug,
    })
}
