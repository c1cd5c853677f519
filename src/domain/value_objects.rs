//! Value Objects - Immutable domain primitives
//!
//! Outcomes and tallies produced while resolving a batch. They are
//! identified by their value and carry no behaviour beyond folding.

use crate::domain::entities::LocationRecord;
use std::fmt;
use std::ops::AddAssign;

/// Result of resolving a single IP inside a worker task.
///
/// Per-IP failures never escape a worker as errors; they are reported
/// through this type and folded into counters by the batch aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The lookup produced usable location data
    Found(LocationRecord),
    /// No usable location data (absent address, empty country, malformed IP)
    Miss,
    /// The worker failed unexpectedly while resolving
    Fault(String),
}

impl TaskOutcome {
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}

impl From<Option<LocationRecord>> for TaskOutcome {
    fn from(value: Option<LocationRecord>) -> Self {
        match value {
            Some(record) => Self::Found(record),
            None => Self::Miss,
        }
    }
}

/// Processed/failed tallies for a batch or a whole run.
///
/// Both counters only ever grow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessingCounters {
    /// IPs resolved to a location
    pub processed: u64,
    /// IPs that missed or faulted
    pub failed: u64,
}

impl ProcessingCounters {
    pub fn new(processed: u64, failed: u64) -> Self {
        Self { processed, failed }
    }

    /// Count one task outcome.
    pub fn record(&mut self, outcome: &TaskOutcome) {
        match outcome {
            TaskOutcome::Found(_) => self.processed += 1,
            TaskOutcome::Miss | TaskOutcome::Fault(_) => self.failed += 1,
        }
    }

    /// Fold another tally (usually a finished batch) into this one.
    pub fn absorb(&mut self, other: ProcessingCounters) {
        self.processed += other.processed;
        self.failed += other.failed;
    }

    pub fn total(&self) -> u64 {
        self.processed + self.failed
    }
}

impl AddAssign for ProcessingCounters {
    fn add_assign(&mut self, rhs: Self) {
        self.absorb(rhs);
    }
}

impl fmt::Display for ProcessingCounters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "processed={} failed={}", self.processed, self.failed)
    }
}
