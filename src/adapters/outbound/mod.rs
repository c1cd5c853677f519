mod csv_result_sink;
mod maxmind_geo_resolver;
mod memory_geo_resolver;
mod mongo_ip_source;
mod sqlite_ip_source;

pub use csv_result_sink::{CsvResultSink, TableStorage};
pub use maxmind_geo_resolver::{MaxMindGeoResolver, ResolverError};
pub use memory_geo_resolver::InMemoryGeoResolver;
pub use mongo_ip_source::{redact_uri, MongoIpSource};
pub use sqlite_ip_source::SqliteIpSource;
