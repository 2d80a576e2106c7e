//! Optional lock-free metrics for monitoring ring throughput and contention.

use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters updated by [`crate::Ring`] operations.
///
/// All fields are independent atomics; a snapshot taken via
/// [`Metrics::snapshot`] is not a single atomic observation across fields, the
/// same way the individual ring counters are not observed atomically as a
/// group — this is advisory telemetry, not a correctness mechanism.
#[derive(Debug, Default)]
pub struct Metrics {
    bytes_offered: AtomicU64,
    bytes_written: AtomicU64,
    bytes_polled: AtomicU64,
    bytes_read: AtomicU64,
    cas_retries: AtomicU64,
}

impl Metrics {
    /// Creates a fresh, zeroed metrics block.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn add_bytes_offered(&self, n: u64) {
        self.bytes_offered.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_bytes_written(&self, n: u64) {
        self.bytes_written.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_bytes_polled(&self, n: u64) {
        self.bytes_polled.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_bytes_read(&self, n: u64) {
        self.bytes_read.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_cas_retry(&self) {
        self.cas_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes a point-in-time snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            bytes_offered: self.bytes_offered.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            bytes_polled: self.bytes_polled.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            cas_retries: self.cas_retries.load(Ordering::Relaxed),
        }
    }
}

/// A plain-data snapshot of [`Metrics`] at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Total bytes any `offer` call attempted to write (requested length,
    /// clamped to capacity).
    pub bytes_offered: u64,
    /// Total bytes actually published by successful `offer` calls.
    pub bytes_written: u64,
    /// Total bytes any `poll` call attempted to read (requested length,
    /// clamped to capacity).
    pub bytes_polled: u64,
    /// Total bytes actually claimed by successful `poll` calls.
    pub bytes_read: u64,
    /// Number of times the publish CAS in `offer` lost a race and had to
    /// surrender its claim.
    pub cas_retries: u64,
}
