//! Pure domain logic for the ClipForge download orchestrator.
//!
//! Everything here is synchronous and side-effect free: job status
//! machinery, batch progress aggregation, remote reference scanning,
//! and filename derivation. Async runtime concerns live in the
//! `aria2` and `jobs` crates.

pub mod error;
pub mod job_events;
pub mod media;
pub mod naming;
pub mod paging;
pub mod progress;
pub mod status;
pub mod types;
