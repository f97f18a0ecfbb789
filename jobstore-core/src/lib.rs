//! Jobstore Core
//!
//! Core types shared by every jobstore crate.
//!
//! This crate contains:
//! - Domain types: job definitions, persisted job records, sweep leases, remote status
//! - DTOs: request bodies of the remote job executor protocol

pub mod domain;
pub mod dto;
