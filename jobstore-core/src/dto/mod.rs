//! Data Transfer Objects
//!
//! Lightweight shapes exchanged between the coordinator, its store adapters and
//! remote job executors.

pub mod job;
pub mod remote;
