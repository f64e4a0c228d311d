//! Scheduling and dispatch core for a time-series aggregation pipeline.
//!
//! This crate decides *when* and *on what* aggregation must happen; it
//! never computes an aggregate itself. See [`scheduler::Scheduler`] for
//! the outer loop and [`policy_resolver`] / [`dirty_fetcher`] /
//! [`work_builder`] for the per-policy pipeline.

pub mod dirty_fetcher;
pub mod error;
pub mod lock;
pub mod metadata_cache;
pub mod model;
pub mod policy_resolver;
pub mod publish;
pub mod scheduler;
pub mod store;
pub mod work_builder;

#[cfg(test)]
pub mod testing;

pub use error::{Result, SchedulerError};
pub use scheduler::{Scheduler, SchedulerTuning};
