//! Application Layer
//!
//! Use cases composed from the domain ports: batching, the worker pool and
//! the run orchestrator.

pub mod pipeline;
pub mod scheduler;
pub mod streamer;

pub use pipeline::{Pipeline, PipelineError, PipelineOptions, RunSummary};
pub use scheduler::BatchScheduler;
pub use streamer::IpBatches;
