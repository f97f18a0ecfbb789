//! Jobstore Service
//!
//! The job execution engine. Every instance of a fleet runs its own `JobService` against one
//! shared store; the store's conditional writes are the only coordination point between
//! instances.
//!
//! - `repository`: store contract, PostgreSQL adapter and in-process adapter
//! - `registry` / `constraints`: process-local job registry and mutual-exclusion sets
//! - `service`: execution coordinator, local runner, remote poller and reaper sweeps
//! - `scheduler`: periodic driver invoking the coordinator and the reaper

pub mod config;
pub mod constraints;
pub mod context;
pub mod db;
pub mod error;
pub mod registry;
pub mod repository;
pub mod runnable;
pub mod scheduler;
pub mod service;

pub use config::Config;
pub use context::JobExecutionContext;
pub use error::{JobError, JobExecutionError, StoreError};
pub use repository::Store;
pub use runnable::{JobRunnable, LocalJobRunnable, RemoteJobRunnable};
pub use service::job::{ActivityCheck, DrainOutcome, JobService};
pub use scheduler::{JobScheduler, SchedulerHandle};
pub use service::reaper::Reaper;
