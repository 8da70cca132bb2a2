//! Job registry, persistence, and pipeline orchestration.
//!
//! A job carries opaque assembly parameters that may reference remote
//! media. The orchestrator downloads those references through the daemon
//! stack, rewrites them to local paths, runs the assembler, and reports
//! every step through the notification sink.

pub mod assembly;
pub mod config;
pub mod context;
pub mod error;
pub mod job;
pub mod monitor;
pub mod orchestrator;
pub mod registry;
pub mod service;
pub mod store;
