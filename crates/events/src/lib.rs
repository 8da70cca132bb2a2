//! ClipForge event bus and notification infrastructure.
//!
//! This crate provides the building blocks for job lifecycle
//! notifications:
//!
//! - [`EventBus`] — in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`JobEvent`] — the canonical job event envelope.
//! - [`NotificationSink`] — the seam the job pipeline pushes updates
//!   through; [`BusSink`] is the bus-backed default.

pub mod bus;
pub mod sink;

pub use bus::{EventBus, JobEvent};
pub use sink::{BusSink, NotificationSink};
