//! Worker Pool Scheduler
//!
//! Fans one batch out across a pool of at most `max_workers` tokio tasks.
//! Every task resolves a single IP and reports a `TaskOutcome` over a
//! channel to one aggregator task, which is the only place counters and
//! found records are mutated. Once every task has been joined, the
//! aggregated records are appended to the sink in a single locked write.

use crate::domain::entities::{Batch, LocationRecord};
use crate::domain::ports::{GeoResolver, ResultSink};
use crate::domain::value_objects::{ProcessingCounters, TaskOutcome};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};

/// Default pool size.
pub const DEFAULT_MAX_WORKERS: usize = 30;

/// Everything the aggregator learned about one batch.
#[derive(Debug, Default)]
struct BatchTally {
    counters: ProcessingCounters,
    records: Vec<LocationRecord>,
}

impl BatchTally {
    fn fold(&mut self, outcome: TaskOutcome) {
        self.counters.record(&outcome);
        match outcome {
            TaskOutcome::Found(record) => self.records.push(record),
            TaskOutcome::Miss => {}
            TaskOutcome::Fault(cause) => tracing::error!("worker fault: {}", cause),
        }
    }
}

/// Single consumer of task outcomes for a batch.
async fn aggregate(mut rx: mpsc::Receiver<TaskOutcome>) -> BatchTally {
    let mut tally = BatchTally::default();
    while let Some(outcome) = rx.recv().await {
        tally.fold(outcome);
    }
    tally
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Resolve one IP inside a worker, turning a panicking resolver into a
/// fault for that IP only.
fn resolve_one(resolver: &dyn GeoResolver, ip: &str) -> TaskOutcome {
    match panic::catch_unwind(AssertUnwindSafe(|| resolver.resolve(ip))) {
        Ok(found) => TaskOutcome::from(found),
        Err(payload) => TaskOutcome::Fault(format!(
            "lookup for {} panicked: {}",
            ip,
            panic_message(payload.as_ref())
        )),
    }
}

/// Bounded worker pool for one batch at a time.
pub struct BatchScheduler {
    resolver: Arc<dyn GeoResolver>,
    sink: Arc<dyn ResultSink>,
    max_workers: usize,
}

impl BatchScheduler {
    /// Create a scheduler. A `max_workers` of zero is treated as one.
    pub fn new(
        resolver: Arc<dyn GeoResolver>,
        sink: Arc<dyn ResultSink>,
        max_workers: usize,
    ) -> Self {
        Self {
            resolver,
            sink,
            max_workers: max_workers.max(1),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Resolve every IP of `batch` and persist the hits.
    ///
    /// Returns once all tasks of the batch have completed and the sink
    /// write (if any) has finished. Per-IP failures only show up in the
    /// returned counters; nothing here fails the batch as a whole.
    pub async fn run_batch(&self, batch: Batch) -> ProcessingCounters {
        let total = batch.len();
        let (tx, rx) = mpsc::channel(self.max_workers);
        let aggregator = tokio::spawn(aggregate(rx));

        let mut tasks = JoinSet::new();
        for ip in batch {
            // pool full: wait for a slot before spawning the next lookup
            while tasks.len() >= self.max_workers {
                if let Some(joined) = tasks.join_next().await {
                    Self::reap(joined, &tx).await;
                }
            }

            let resolver = Arc::clone(&self.resolver);
            let tx = tx.clone();
            tasks.spawn(async move {
                let outcome = resolve_one(resolver.as_ref(), &ip);
                // the aggregator outlives every task, so this cannot fail
                let _ = tx.send(outcome).await;
            });
        }

        while let Some(joined) = tasks.join_next().await {
            Self::reap(joined, &tx).await;
        }
        drop(tx);

        let tally = match aggregator.await {
            Ok(tally) => tally,
            Err(e) => {
                tracing::error!("batch aggregator failed: {}", e);
                return ProcessingCounters::new(0, total as u64);
            }
        };

        self.flush(tally.records).await;
        tally.counters
    }

    /// Forward a task that died before reporting as a fault. The
    /// aggregator logs it.
    async fn reap(joined: Result<(), JoinError>, tx: &mpsc::Sender<TaskOutcome>) {
        if let Err(e) = joined {
            let _ = tx
                .send(TaskOutcome::Fault(format!("worker task failed: {}", e)))
                .await;
        }
    }

    /// Append the batch's records under one sink lock, off the async workers.
    async fn flush(&self, records: Vec<LocationRecord>) {
        if records.is_empty() {
            return;
        }

        let count = records.len();
        let sink = Arc::clone(&self.sink);
        match tokio::task::spawn_blocking(move || sink.append_batch(&records)).await {
            Ok(Ok(written)) => tracing::debug!("appended {} rows", written),
            Ok(Err(e)) => tracing::error!("dropping {} rows, sink write failed: {}", count, e),
            Err(e) => tracing::error!("dropping {} rows, sink task failed: {}", count, e),
        }
    }
}
