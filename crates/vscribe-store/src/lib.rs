//! HTTP client for the job store API.
//!
//! This crate provides:
//! - Claim/next polling for pending jobs
//! - Job status transition calls (start/complete/fail)
//! - Subject and artifact CRUD used by the processors

pub mod client;
pub mod error;

pub use client::{JobStore, StoreConfig};
pub use error::{StoreError, StoreResult};
