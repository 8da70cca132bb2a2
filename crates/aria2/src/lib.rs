//! aria2 daemon integration library.
//!
//! Provides cross-process singleton arbitration for the daemon port,
//! process lifecycle supervision (spawn, adopt, health-check, stop),
//! a typed JSON-RPC client with connectivity retry, and transfer
//! submission with batch tracking and restart-on-failure.

pub mod client;
pub mod config;
pub mod messages;
pub mod retry;
pub mod rpc;
pub mod singleton;
pub mod supervisor;
