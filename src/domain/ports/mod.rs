mod geo_resolver;
mod ip_source;
mod result_sink;

pub use geo_resolver::GeoResolver;
pub use ip_source::{DistinctIpSource, IpStream, SourceError, SourceInfo};
pub use result_sink::{ResultSink, SinkError};
