//! The lock-free concurrent byte ring buffer.
//!
//! # Memory ordering & synchronization strategy
//!
//! Three unbounded `u64` cursors, instead of wrapped indices, eliminate the
//! ABA problem entirely:
//! - `w_started` — bytes claimed by writers (any number of concurrent
//!   producers).
//! - `w_finished` — bytes durably written and safe to read; advanced only by
//!   a CAS that serializes publication in claim order.
//! - `r_started` — bytes claimed by readers (any number of concurrent
//!   consumers); there is no separate "r_finished" because a reader that
//!   claims a range is responsible for consuming it before returning.
//!
//! A physical index is computed from a cursor only at the point of touching
//! `storage`, via `cursor & mask`.
//!
//! **Producer (`offer`):**
//! 1. `fetch_add` `w_started` by the clamped length, `Relaxed` (the claim
//!    itself needs no ordering; correctness comes from the CAS below).
//! 2. Snapshot `r_started` to bound how much of the claim is actually usable.
//! 3. Copy bytes into `storage` — sequenced before the publish CAS by plain
//!    program order.
//! 4. CAS `w_finished` from the claim start to the claim end, `Release`. A
//!    failed CAS means an earlier claim has not yet published; this claim's
//!    bytes are silently dropped (never exposed) rather than creating a gap.
//!
//! **Consumer (`poll`):**
//! 1. `fetch_add` `r_started` by the clamped length, `Relaxed`.
//! 2. `Acquire`-load `w_finished`, synchronizing with the producer's
//!    `Release` CAS, to bound how much of the claim is actually readable.
//! 3. Copy bytes out of `storage` — sequenced after that `Acquire` load.
//!
//! No publish step is needed on the read side: each logical position is
//! claimed by exactly one `fetch_add`, so two readers can never observe the
//! same byte.

use crate::config::RingConfig;
use crate::error::RingError;
use crate::invariants::{
    debug_assert_monotonic, debug_assert_no_read_before_write, debug_assert_ordered_publish,
};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::{Backoff, CancellationToken};
use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Weak;

/// A fixed-capacity, lock-free, multi-producer multi-consumer byte ring
/// buffer.
///
/// See the module documentation for the synchronization protocol. `Ring` is
/// usually wrapped in an `Arc` by its owner; producers and any background
/// refresh hold only a [`std::sync::Weak`] reference (see
/// [`BlockingWriteOnWeak`]).
pub struct Ring {
    w_started: CachePadded<AtomicU64>,
    w_finished: CachePadded<AtomicU64>,
    r_started: CachePadded<AtomicU64>,
    storage: UnsafeCell<Box<[u8]>>,
    config: RingConfig,
    metrics: Metrics,
}

// Safety: all access to `storage` is partitioned by the counter discipline
// described in the module docs — at any moment, a given physical index is
// touched by at most one in-flight claim.
unsafe impl Send for Ring {}
unsafe impl Sync for Ring {}

impl Ring {
    /// Creates a new ring with the given configuration.
    #[must_use]
    pub fn new(config: RingConfig) -> Self {
        let storage = vec![0u8; config.capacity()].into_boxed_slice();
        Self {
            w_started: CachePadded::new(AtomicU64::new(0)),
            w_finished: CachePadded::new(AtomicU64::new(0)),
            r_started: CachePadded::new(AtomicU64::new(0)),
            storage: UnsafeCell::new(storage),
            config,
            metrics: Metrics::new(),
        }
    }

    /// Returns the ring's fixed capacity in bytes.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.config.capacity()
    }

    /// Returns a metrics snapshot (all zero if metrics were not enabled in
    /// this ring's [`RingConfig`]).
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    fn check_bounds(buf_len: usize, offset: usize, length: usize) -> Result<(), RingError> {
        let end = offset.checked_add(length).ok_or(RingError::InvalidArgument {
            reason: "offset + length overflows",
        })?;
        if end > buf_len {
            return Err(RingError::InvalidArgument {
                reason: "offset + length exceeds buffer bounds",
            });
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Nonblocking operations
    // -----------------------------------------------------------------

    /// Nonblocking write. Writes up to `min(length, capacity)` bytes from
    /// `src[offset..offset+length]`; returns the number actually written,
    /// possibly zero. A successful return of `k` guarantees those `k` bytes
    /// are visible to any later `poll` whose claim reaches them.
    ///
    /// # Errors
    ///
    /// Returns [`RingError::InvalidArgument`] if `offset + length` exceeds
    /// `src.len()`.
    pub fn offer(&self, src: &[u8], offset: usize, length: usize) -> Result<usize, RingError> {
        Self::check_bounds(src.len(), offset, length)?;

        let capacity = self.capacity();
        let len = length.min(capacity);
        if len == 0 {
            return Ok(0);
        }

        // Claim.
        let write_start = self.w_started.fetch_add(len as u64, Ordering::Relaxed);

        // Bound.
        let r_started = self.r_started.load(Ordering::Relaxed);
        let write_limit = r_started.saturating_add(capacity as u64);
        let actual = if write_start >= write_limit {
            0
        } else {
            len.min((write_limit - write_start) as usize)
        };

        // Copy (sequenced before the publish CAS by program order).
        if actual > 0 {
            // SAFETY: `[write_start, write_start + actual)` was claimed
            // exclusively by this call's fetch_add; no other writer or
            // reader touches these physical indices concurrently.
            unsafe {
                self.copy_wrap_in(src, offset, write_start, actual);
            }
        }

        // Publish, rejecting out-of-order finishes.
        let published = if actual == 0 {
            true
        } else {
            let new_finished = write_start + actual as u64;
            self.w_finished
                .compare_exchange(write_start, new_finished, Ordering::Release, Ordering::Relaxed)
                .map(|observed| {
                    debug_assert_ordered_publish!(write_start, observed);
                })
                .is_ok()
        };

        let actual = if published {
            actual
        } else {
            if self.config.metrics_enabled() {
                self.metrics.add_cas_retry();
            }
            0
        };

        // Return unused claim.
        if actual < len {
            self.w_started.fetch_sub((len - actual) as u64, Ordering::Relaxed);
        }

        if self.config.metrics_enabled() {
            self.metrics.add_bytes_offered(len as u64);
            self.metrics.add_bytes_written(actual as u64);
        }

        Ok(actual)
    }

    /// Nonblocking read. Reads up to `min(length, capacity)` bytes into
    /// `dst[offset..offset+length]`; returns the number actually read. A
    /// nonzero return is a commitment that those logical positions will
    /// never be returned again.
    ///
    /// # Errors
    ///
    /// Returns [`RingError::InvalidArgument`] if `offset + length` exceeds
    /// `dst.len()`.
    pub fn poll(&self, dst: &mut [u8], offset: usize, length: usize) -> Result<usize, RingError> {
        Self::check_bounds(dst.len(), offset, length)?;

        let capacity = self.capacity();
        let len = length.min(capacity);
        if len == 0 {
            return Ok(0);
        }

        // Claim.
        let read_start = self.r_started.fetch_add(len as u64, Ordering::Relaxed);

        // Bound.
        let w_finished = self.w_finished.load(Ordering::Acquire);
        let actual = if read_start >= w_finished {
            0
        } else {
            len.min((w_finished - read_start) as usize)
        };

        // Copy (sequenced after the acquire load above).
        if actual > 0 {
            debug_assert_no_read_before_write!(read_start + actual as u64, w_finished);
            // SAFETY: `[read_start, read_start + actual)` was claimed
            // exclusively by this call's fetch_add, and lies entirely below
            // the just-observed `w_finished`, so every byte in it was
            // published by a completed `offer` before this load.
            unsafe {
                self.copy_wrap_out(dst, offset, read_start, actual);
            }
        }

        // Return unused claim.
        if actual < len {
            self.r_started.fetch_sub((len - actual) as u64, Ordering::Relaxed);
        }

        if self.config.metrics_enabled() {
            self.metrics.add_bytes_polled(len as u64);
            self.metrics.add_bytes_read(actual as u64);
        }

        debug_assert_monotonic!(
            "r_started",
            read_start,
            self.r_started.load(Ordering::Relaxed)
        );

        Ok(actual)
    }

    /// All-or-nothing read. Fails immediately if `length > capacity()`.
    /// Otherwise reads via [`poll`](Self::poll); on a short read, pushes the
    /// partially-claimed bytes back into the ring via
    /// [`offer`](Self::offer) (best-effort — a failed pushback simply drops
    /// entropy, which is safe) and returns `Ok(false)`.
    ///
    /// # Errors
    ///
    /// Returns [`RingError::InvalidArgument`] if `length > capacity()` or if
    /// `offset + length` exceeds `dst.len()`.
    pub fn poll_exact(
        &self,
        dst: &mut [u8],
        offset: usize,
        length: usize,
    ) -> Result<bool, RingError> {
        if length > self.capacity() {
            return Err(RingError::InvalidArgument {
                reason: "length exceeds ring capacity",
            });
        }
        let n = self.poll(dst, offset, length)?;
        if n == length {
            return Ok(true);
        }
        if n > 0 {
            let _ = self.offer(dst, offset, n);
        }
        Ok(false)
    }

    // -----------------------------------------------------------------
    // Blocking operations
    // -----------------------------------------------------------------

    /// Blocking write: loops over [`offer`](Self::offer) until all `length`
    /// bytes have moved. Observes `cancel` on every iteration; when an
    /// iteration moves zero bytes, spins/yields via [`Backoff`] rather than
    /// parking.
    ///
    /// # Errors
    ///
    /// Returns [`RingError::Cancelled`] if `cancel` is set before the write
    /// completes, or [`RingError::InvalidArgument`] for bad bounds.
    pub fn write(
        &self,
        src: &[u8],
        offset: usize,
        length: usize,
        cancel: &CancellationToken,
    ) -> Result<(), RingError> {
        Self::check_bounds(src.len(), offset, length)?;
        let mut done = 0;
        let mut backoff = Backoff::new();
        while done < length {
            if cancel.is_cancelled() {
                return Err(RingError::Cancelled);
            }
            let n = self.offer(src, offset + done, length - done)?;
            if n == 0 {
                backoff.snooze();
            } else {
                done += n;
                backoff.reset();
            }
        }
        Ok(())
    }

    /// Blocking read: loops over [`poll`](Self::poll) until all `length`
    /// bytes have moved. Observes `cancel` on every iteration; when an
    /// iteration moves zero bytes, spins/yields via [`Backoff`] rather than
    /// parking.
    ///
    /// # Errors
    ///
    /// Returns [`RingError::Cancelled`] if `cancel` is set before the read
    /// completes, or [`RingError::InvalidArgument`] for bad bounds.
    pub fn read(
        &self,
        dst: &mut [u8],
        offset: usize,
        length: usize,
        cancel: &CancellationToken,
    ) -> Result<(), RingError> {
        Self::check_bounds(dst.len(), offset, length)?;
        let mut done = 0;
        let mut backoff = Backoff::new();
        while done < length {
            if cancel.is_cancelled() {
                return Err(RingError::Cancelled);
            }
            let n = self.poll(dst, offset + done, length - done)?;
            if n == 0 {
                backoff.snooze();
            } else {
                done += n;
                backoff.reset();
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Wrap-aware copies
    // -----------------------------------------------------------------

    /// # Safety
    ///
    /// The caller must have exclusively claimed `[start, start + len)` via
    /// `w_started`'s fetch_add, and no other in-flight claim may overlap it.
    unsafe fn copy_wrap_in(&self, src: &[u8], src_offset: usize, start: u64, len: usize) {
        let mask = self.config.mask();
        let idx = (start as usize) & mask;
        let storage = &mut *self.storage.get();
        let first = len.min(self.capacity() - idx);
        ptr::copy_nonoverlapping(src.as_ptr().add(src_offset), storage.as_mut_ptr().add(idx), first);
        if first < len {
            let rest = len - first;
            ptr::copy_nonoverlapping(
                src.as_ptr().add(src_offset + first),
                storage.as_mut_ptr(),
                rest,
            );
        }
    }

    /// # Safety
    ///
    /// The caller must have exclusively claimed `[start, start + len)` via
    /// `r_started`'s fetch_add, and the range must lie within an
    /// already-`Acquire`-observed `w_finished`.
    unsafe fn copy_wrap_out(&self, dst: &mut [u8], dst_offset: usize, start: u64, len: usize) {
        let mask = self.config.mask();
        let idx = (start as usize) & mask;
        let storage = &*self.storage.get();
        let first = len.min(self.capacity() - idx);
        ptr::copy_nonoverlapping(storage.as_ptr().add(idx), dst.as_mut_ptr().add(dst_offset), first);
        if first < len {
            let rest = len - first;
            ptr::copy_nonoverlapping(
                storage.as_ptr(),
                dst.as_mut_ptr().add(dst_offset + first),
                rest,
            );
        }
    }
}

/// Extension for issuing a blocking write against a non-owning
/// [`std::sync::Weak`] reference to a [`Ring`] — the producer-side
/// termination hook described in the module docs: if the ring's last strong
/// reference has been dropped, the write aborts cleanly with `Ok(())` rather
/// than an error.
pub trait BlockingWriteOnWeak {
    /// Blocking write through a weak handle. Returns `Ok(())` immediately,
    /// without writing anything, if the ring is no longer reachable.
    ///
    /// # Errors
    ///
    /// Returns [`RingError::Cancelled`] if `cancel` fires before the write
    /// completes (and the ring is still reachable), or
    /// [`RingError::InvalidArgument`] for bad bounds.
    fn blocking_write(
        &self,
        src: &[u8],
        offset: usize,
        length: usize,
        cancel: &CancellationToken,
    ) -> Result<(), RingError>;
}

impl BlockingWriteOnWeak for Weak<Ring> {
    fn blocking_write(
        &self,
        src: &[u8],
        offset: usize,
        length: usize,
        cancel: &CancellationToken,
    ) -> Result<(), RingError> {
        Ring::check_bounds(src.len(), offset, length)?;
        let mut done = 0;
        let mut backoff = Backoff::new();
        while done < length {
            if cancel.is_cancelled() {
                return Err(RingError::Cancelled);
            }
            let Some(ring) = self.upgrade() else {
                return Ok(());
            };
            let n = ring.offer(src, offset + done, length - done)?;
            if n == 0 {
                backoff.snooze();
            } else {
                done += n;
                backoff.reset();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ring(capacity: usize) -> Ring {
        Ring::new(RingConfig::new(capacity, true).unwrap())
    }

    #[test]
    fn scenario_single_threaded_fill_and_drain() {
        let r = ring(16);
        let src: Vec<u8> = (1..=16).collect();
        assert_eq!(r.offer(&src, 0, 16).unwrap(), 16);
        assert_eq!(r.offer(&[17], 0, 1).unwrap(), 0);

        let mut d = [0u8; 8];
        assert_eq!(r.poll(&mut d, 0, 8).unwrap(), 8);
        assert_eq!(&d[0..8], &(1u8..=8).collect::<Vec<_>>()[..]);

        let more: Vec<u8> = (17..=24).collect();
        assert_eq!(r.offer(&more, 0, 8).unwrap(), 8);

        let mut d2 = [0u8; 16];
        assert_eq!(r.poll(&mut d2, 0, 16).unwrap(), 16);
        let expected: Vec<u8> = (9..=16).chain(17..=24).collect();
        assert_eq!(&d2[..], &expected[..]);
    }

    #[test]
    fn scenario_wrap_at_boundary() {
        let r = ring(8);
        let src: Vec<u8> = (1..=8).collect();
        assert_eq!(r.offer(&src, 0, 8).unwrap(), 8);

        let mut d = [0u8; 5];
        assert_eq!(r.poll(&mut d, 0, 5).unwrap(), 5);

        let more: Vec<u8> = (9..=13).collect();
        assert_eq!(r.offer(&more, 0, 5).unwrap(), 5);

        let mut d2 = [0u8; 8];
        assert_eq!(r.poll(&mut d2, 0, 8).unwrap(), 8);
        assert_eq!(&d2[..], &[6, 7, 8, 9, 10, 11, 12, 13]);
    }

    #[test]
    fn scenario_over_capacity_is_clamped() {
        let r = ring(4);
        let src: Vec<u8> = (1..=100).collect();
        assert_eq!(r.offer(&src, 0, 100).unwrap(), 4);
    }

    #[test]
    fn scenario_poll_exact_push_back() {
        let r = ring(8);
        let src = [b'a', b'b', b'c'];
        assert_eq!(r.offer(&src, 0, 3).unwrap(), 3);

        let mut d = [0u8; 8];
        assert!(!r.poll_exact(&mut d, 0, 8).unwrap());

        let mut d2 = [0u8; 3];
        assert_eq!(r.poll(&mut d2, 0, 3).unwrap(), 3);
        assert_eq!(&d2, &src);
    }

    #[test]
    fn zero_length_offer_and_poll_are_noops() {
        let r = ring(8);
        assert_eq!(r.offer(&[], 0, 0).unwrap(), 0);
        assert_eq!(r.poll(&mut [], 0, 0).unwrap(), 0);
        assert_eq!(r.w_started.load(Ordering::Relaxed), 0);
        assert_eq!(r.r_started.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn single_byte_ring_round_trips() {
        let r = ring(1);
        assert_eq!(r.offer(&[42], 0, 1).unwrap(), 1);
        assert_eq!(r.offer(&[7], 0, 1).unwrap(), 0);
        let mut d = [0u8];
        assert_eq!(r.poll(&mut d, 0, 1).unwrap(), 1);
        assert_eq!(d[0], 42);
        assert_eq!(r.offer(&[7], 0, 1).unwrap(), 1);
    }

    #[test]
    fn invalid_argument_on_out_of_bounds() {
        let r = ring(8);
        let src = [1u8, 2, 3];
        assert!(matches!(
            r.offer(&src, 2, 5),
            Err(RingError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn blocking_round_trip_matches_input() {
        let r = ring(32);
        let cancel = CancellationToken::new();
        let data: Vec<u8> = (0..200u32).map(|x| x as u8).collect();

        std::thread::scope(|scope| {
            scope.spawn(|| {
                r.write(&data, 0, data.len(), &cancel).unwrap();
            });
            let mut out = vec![0u8; data.len()];
            r.read(&mut out, 0, data.len(), &cancel).unwrap();
            assert_eq!(out, data);
        });
    }

    #[test]
    fn contended_writers_preserve_no_phantom_reads() {
        let r = Arc::new(ring(1024));
        let cancel = CancellationToken::new();

        let pattern_a: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let pattern_b: Vec<u8> = (0..10_000u32).map(|i| ((i * 7 + 3) % 251) as u8).collect();

        std::thread::scope(|scope| {
            let ra = Arc::clone(&r);
            let ca = cancel.clone();
            let pa = pattern_a.clone();
            scope.spawn(move || ra.write(&pa, 0, pa.len(), &ca).unwrap());

            let rb = Arc::clone(&r);
            let cb = cancel.clone();
            let pb = pattern_b.clone();
            scope.spawn(move || rb.write(&pb, 0, pb.len(), &cb).unwrap());

            let mut accumulated = Vec::with_capacity(20_000);
            let mut chunk = [0u8; 997];
            while accumulated.len() < 20_000 {
                let n = r.poll(&mut chunk, 0, chunk.len()).unwrap();
                accumulated.extend_from_slice(&chunk[..n]);
                if n == 0 {
                    std::hint::spin_loop();
                }
            }

            let mut expected: Vec<u8> = pattern_a.iter().chain(pattern_b.iter()).copied().collect();
            let mut got = accumulated;
            expected.sort_unstable();
            got.sort_unstable();
            assert_eq!(expected, got);
        });
    }

    #[test]
    fn weak_reference_termination_is_graceful() {
        let r = Arc::new(ring(16));
        let weak = Arc::downgrade(&r);
        let cancel = CancellationToken::new();
        let big = vec![0u8; 1_000_000];

        drop(r);
        // `blocking_write` must observe the dead weak reference and return
        // promptly without error, even though the requested length could
        // never fit in a 16-byte ring.
        let result = weak.blocking_write(&big, 0, big.len(), &cancel);
        assert!(result.is_ok());
    }
}
