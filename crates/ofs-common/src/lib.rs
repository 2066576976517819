//! OFS Common - Shared types for the OpenFlow 1.3 software datapath
//!
//! This crate provides the primitives every datapath component agrees on:
//! - Match field catalogue (OXM basic class subset)
//! - Flow identifiers and the hash used for select-group bucket choice
//! - OpenFlow error types and codes returned to the controller
//! - Monotonic timestamps and lock-free counters
//! - Logging bootstrap

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod fields;
pub mod flow;
pub mod logging;

pub use error::*;
pub use fields::MatchField;
pub use flow::FlowKey;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Monotonic nanosecond timestamp
///
/// Measured from a process-wide anchor so values are comparable across
/// threads and never go backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct Timestamp(u64);

fn anchor() -> Instant {
    static ANCHOR: OnceLock<Instant> = OnceLock::new();
    *ANCHOR.get_or_init(Instant::now)
}

impl Timestamp {
    /// Get current timestamp
    #[inline(always)]
    pub fn now() -> Self {
        Self(anchor().elapsed().as_nanos() as u64)
    }

    /// Build from a raw nanosecond value
    #[inline(always)]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Get nanoseconds value
    #[inline(always)]
    pub fn as_nanos(&self) -> u64 {
        self.0
    }

    /// Time elapsed between `earlier` and this timestamp (zero if `earlier` is later)
    #[inline(always)]
    pub fn saturating_since(&self, earlier: Timestamp) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }

    /// Timestamp shifted forward by `d`
    #[inline(always)]
    pub fn add(&self, d: Duration) -> Self {
        Self(self.0.saturating_add(d.as_nanos() as u64))
    }

    /// Duration since this timestamp in microseconds
    #[inline(always)]
    pub fn elapsed_micros(&self) -> u64 {
        Self::now().saturating_since(*self).as_micros() as u64
    }
}

/// High-performance counter for lock-free statistics
#[derive(Debug, Default)]
pub struct AtomicCounter(AtomicU64);

impl AtomicCounter {
    /// Create new counter
    pub const fn new(value: u64) -> Self {
        Self(AtomicU64::new(value))
    }

    /// Increment and return previous value
    #[inline(always)]
    pub fn inc(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }

    /// Add value and return previous
    #[inline(always)]
    pub fn add(&self, val: u64) -> u64 {
        self.0.fetch_add(val, Ordering::Relaxed)
    }

    /// Get current value
    #[inline(always)]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    /// Reset to zero, returning the previous value
    #[inline(always)]
    pub fn reset(&self) -> u64 {
        self.0.swap(0, Ordering::Relaxed)
    }
}
