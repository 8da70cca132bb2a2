//! Pagination constants and helpers for job listings.
//!
//! This module lives in `core` (zero internal deps) so it can be used by
//! the registry layer and any future CLI or API tooling.

/// Default number of jobs per listing page.
pub const DEFAULT_LIST_LIMIT: usize = 50;

/// Maximum number of jobs per listing page.
pub const MAX_LIST_LIMIT: usize = 500;

/// Clamp a user-provided limit to valid bounds.
pub fn clamp_limit(limit: Option<usize>, default: usize, max: usize) -> usize {
    limit.unwrap_or(default).clamp(1, max)
}

/// Clamp a user-provided offset, defaulting to the start of the listing.
pub fn clamp_offset(offset: Option<usize>) -> usize {
    offset.unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
