//! Core domain types
//!
//! These types describe jobs as they are registered by an application, persisted in the
//! shared job store and observed on a remote executor. They are shared between the engine
//! (which persists and mutates them) and the CLI (which inspects them).

pub mod definition;
pub mod job;
pub mod lease;
pub mod log;
pub mod remote;
