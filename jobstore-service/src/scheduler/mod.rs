//! Periodic driver
//!
//! Invokes the coordinator's drain, poll and retry passes and the reaper's sweeps on their
//! configured cadences.

pub mod driver;

pub use driver::{JobScheduler, SchedulerHandle};
