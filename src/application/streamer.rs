//! Distinct-IP Streamer
//!
//! Groups a lazy stream of distinct addresses into bounded batches. At most
//! one batch is held at a time; the next one is only read from the source
//! when the caller asks for it.

use crate::domain::entities::Batch;
use crate::domain::ports::{IpStream, SourceError};
use futures::StreamExt;

/// Upper bound on the up-front allocation for a batch.
const MAX_PREALLOC: usize = 16 * 1024;

/// Batching cursor over a distinct-IP stream.
pub struct IpBatches {
    stream: IpStream,
    batch_size: usize,
    exhausted: bool,
}

impl IpBatches {
    /// Wrap `stream`, emitting batches of at most `batch_size` addresses.
    ///
    /// A `batch_size` of zero is treated as one.
    pub fn new(stream: IpStream, batch_size: usize) -> Self {
        Self {
            stream,
            batch_size: batch_size.max(1),
            exhausted: false,
        }
    }

    /// Pull the next batch from the source.
    ///
    /// Returns `Ok(None)` once the source is exhausted; the final batch may
    /// be smaller than the limit but is never empty. A source error ends
    /// the sequence: the addresses read so far in the failing batch are
    /// discarded and later calls return `Ok(None)`.
    pub async fn next_batch(&mut self) -> Result<Option<Batch>, SourceError> {
        if self.exhausted {
            return Ok(None);
        }

        let mut batch = Vec::with_capacity(self.batch_size.min(MAX_PREALLOC));
        while batch.len() < self.batch_size {
            match self.stream.next().await {
                Some(Ok(ip)) => batch.push(ip),
                Some(Err(e)) => {
                    self.exhausted = true;
                    return Err(e);
                }
                None => {
                    self.exhausted = true;
                    break;
                }
            }
        }

        if batch.is_empty() {
            Ok(None)
        } else {
            Ok(Some(batch))
        }
    }
}
