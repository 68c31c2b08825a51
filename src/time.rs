//! The adjusted-time collaborator (spec §1): a callable returning a
//! monotonically-reasonable Unix timestamp. Out of scope for the core
//! algorithm, so it is modeled as a trait an embedder can substitute in tests.

use std::time::{SystemTime, UNIX_EPOCH};

pub trait TimeSource {
    fn now(&self) -> i64;
}

/// Default [`TimeSource`] backed by the system wall clock.
#[derive(Debug, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

/// A fixed clock for deterministic tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedTimeSource(pub i64);

impl TimeSource for FixedTimeSource {
    fn now(&self) -> i64 {
        self.0
    }
}
