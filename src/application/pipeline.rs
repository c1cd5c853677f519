//! Pipeline Orchestrator - Main application use case
//!
//! Drives a full run: checks the source, streams distinct IPs in batches,
//! pushes each batch through the worker pool, and folds the per-batch
//! counters into the run totals.

use crate::application::scheduler::{BatchScheduler, DEFAULT_MAX_WORKERS};
use crate::application::streamer::IpBatches;
use crate::domain::ports::{DistinctIpSource, GeoResolver, ResultSink, SourceError};
use crate::domain::value_objects::ProcessingCounters;
use crate::infrastructure::ShutdownController;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;

/// Default number of IPs per batch.
pub const DEFAULT_BATCH_SIZE: usize = 100_000;

/// Default source collection.
pub const DEFAULT_COLLECTION: &str = "summary";

/// Fatal pipeline errors. Per-IP failures never end up here.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("distinct-IP source failed: {0}")]
    Source(#[from] SourceError),
}

/// Run parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Collection (or table) holding the `ip` field
    pub collection: String,
    /// Maximum IPs per batch
    pub batch_size: usize,
    /// Maximum concurrent lookups
    pub max_workers: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            collection: DEFAULT_COLLECTION.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            max_workers: DEFAULT_MAX_WORKERS,
        }
    }
}

/// Aggregate result of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub counters: ProcessingCounters,
    /// Batches fully processed
    pub batches: u64,
    pub elapsed: Duration,
    /// The run stopped early on request
    pub interrupted: bool,
}

impl RunSummary {
    /// A run succeeds when it reached the end of the source.
    pub fn is_success(&self) -> bool {
        !self.interrupted
    }
}

fn per_second(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}

/// Batch-resolution pipeline.
///
/// Batches are processed strictly one after another: the pool is drained
/// before the next batch is pulled from the source.
pub struct Pipeline {
    source: Arc<dyn DistinctIpSource>,
    scheduler: BatchScheduler,
    options: PipelineOptions,
}

impl Pipeline {
    /// Create a pipeline. The resolver is shared by every worker of every batch.
    pub fn new(
        source: Arc<dyn DistinctIpSource>,
        resolver: Arc<dyn GeoResolver>,
        sink: Arc<dyn ResultSink>,
        options: PipelineOptions,
    ) -> Self {
        let scheduler = BatchScheduler::new(resolver, sink, options.max_workers);
        Self {
            source,
            scheduler,
            options,
        }
    }

    /// Run until the source is exhausted or shutdown is requested.
    ///
    /// Shutdown is honoured between batches only. Rows written before a
    /// fatal source error are kept.
    pub async fn run(&self, shutdown: &ShutdownController) -> Result<RunSummary, PipelineError> {
        let started = Instant::now();

        let info = self.source.ping().await.map_err(|e| {
            tracing::error!("source connectivity check failed: {}", e);
            e
        })?;
        tracing::info!(
            "source reachable: version={} collections={}",
            info.server_version,
            info.collections.len()
        );

        tracing::info!(
            "processing IPs from collection {} (batch_size={} max_workers={})",
            self.options.collection,
            self.options.batch_size,
            self.scheduler.max_workers()
        );

        let stream = self.source.distinct_ips(&self.options.collection).await?;
        let mut batches = IpBatches::new(stream, self.options.batch_size);

        let mut totals = ProcessingCounters::default();
        let mut batch_count: u64 = 0;
        let mut interrupted = false;

        loop {
            if shutdown.is_shutdown() {
                tracing::warn!("stopping before batch {}: shutdown requested", batch_count + 1);
                interrupted = true;
                break;
            }

            let batch = match batches.next_batch().await {
                Ok(Some(batch)) => batch,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(
                        "source failed after {} batches ({}): {}",
                        batch_count,
                        totals,
                        e
                    );
                    return Err(e.into());
                }
            };

            let index = batch_count + 1;
            let size = batch.len() as u64;
            tracing::info!(
                "processing batch {} of {} IPs (total so far: {})",
                index,
                size,
                totals.total()
            );

            let batch_started = Instant::now();
            let counters = self
                .scheduler
                .run_batch(batch)
                .instrument(tracing::info_span!("batch", index, size))
                .await;
            let elapsed = batch_started.elapsed();

            tracing::info!(
                "batch {} completed: {}/{} IPs in {:.2}s ({:.2} IPs/sec)",
                index,
                counters.processed,
                size,
                elapsed.as_secs_f64(),
                per_second(size, elapsed)
            );

            totals.absorb(counters);
            batch_count += 1;
        }

        let summary = RunSummary {
            counters: totals,
            batches: batch_count,
            elapsed: started.elapsed(),
            interrupted,
        };

        tracing::info!(
            "completed {} batches: {} IPs resolved, {} failed in {:.2}s ({:.2} IPs/sec)",
            summary.batches,
            summary.counters.processed,
            summary.counters.failed,
            summary.elapsed.as_secs_f64(),
            per_second(summary.counters.total(), summary.elapsed)
        );

        Ok(summary)
    }
}
