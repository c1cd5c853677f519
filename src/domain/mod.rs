//! Domain Layer
//!
//! Entities, value objects and the ports the pipeline depends on.

pub mod entities;
pub mod ports;
pub mod value_objects;

pub use entities::{Batch, LocationRecord};
pub use value_objects::{ProcessingCounters, TaskOutcome};
