//! Result Sink Port
//!
//! Defines the interface for persisting resolved location records.

use crate::domain::entities::LocationRecord;

/// Errors raised while persisting records.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("output I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("output encoding error: {0}")]
    Csv(#[from] csv::Error),
}

/// Append-only destination for location records.
///
/// Implementations serialize concurrent writers and write any header
/// before the first row.
pub trait ResultSink: Send + Sync {
    /// Append every record under a single acquisition of the write lock.
    ///
    /// Returns the number of rows written.
    fn append_batch(&self, records: &[LocationRecord]) -> Result<usize, SinkError>;

    /// Append a single record.
    fn append(&self, record: &LocationRecord) -> Result<(), SinkError> {
        self.append_batch(std::slice::from_ref(record)).map(|_| ())
    }
}
