//! ipgeo-batch Library
//!
//! Resolves the distinct IP addresses of a document-store collection to
//! geographic locations with an offline GeoIP database and appends the
//! results to a CSV table.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-export commonly used types
pub use adapters::outbound::{
    CsvResultSink, InMemoryGeoResolver, MaxMindGeoResolver, MongoIpSource, SqliteIpSource,
    TableStorage,
};
pub use application::{
    BatchScheduler, IpBatches, Pipeline, PipelineError, PipelineOptions, RunSummary,
};
pub use config::{load_config, Config, SourceKind};
pub use domain::entities::{Batch, LocationRecord};
pub use domain::ports::{DistinctIpSource, GeoResolver, ResultSink, SinkError, SourceError};
pub use domain::value_objects::{ProcessingCounters, TaskOutcome};
pub use infrastructure::ShutdownController;
