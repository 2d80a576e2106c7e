//! Loom-based exhaustive interleaving exploration of the ring's claim/bound/
//! copy/publish protocol.
//!
//! Run with: `cargo test --features loom --test loom_tests --release`
//!
//! The full `Ring` is too large a state space for loom to explore directly
//! (its `UnsafeCell<Box<[u8]>>` storage and `crossbeam_utils::CachePadded`
//! counters don't plug into loom's atomics). Instead this models the
//! counter/CAS protocol in isolation, at a capacity small enough for loom's
//! exhaustive search to finish in reasonable time, the same way the core
//! synchronization is validated in isolation elsewhere in this codebase.

#![cfg(feature = "loom")]

use loom::sync::atomic::{AtomicU64, Ordering};
use loom::sync::Arc;
use loom::thread;
use std::cell::UnsafeCell;

const CAPACITY: usize = 4;

struct LoomRing {
    w_started: AtomicU64,
    w_finished: AtomicU64,
    r_started: AtomicU64,
    storage: UnsafeCell<[u8; CAPACITY]>,
}

unsafe impl Send for LoomRing {}
unsafe impl Sync for LoomRing {}

impl LoomRing {
    fn new() -> Self {
        Self {
            w_started: AtomicU64::new(0),
            w_finished: AtomicU64::new(0),
            r_started: AtomicU64::new(0),
            storage: UnsafeCell::new([0; CAPACITY]),
        }
    }

    fn offer_one(&self, value: u8) -> bool {
        let write_start = self.w_started.fetch_add(1, Ordering::Relaxed);
        let r_started = self.r_started.load(Ordering::Relaxed);
        if write_start >= r_started + CAPACITY as u64 {
            self.w_started.fetch_sub(1, Ordering::Relaxed);
            return false;
        }

        let idx = (write_start as usize) % CAPACITY;
        unsafe {
            (*self.storage.get())[idx] = value;
        }

        match self.w_finished.compare_exchange(
            write_start,
            write_start + 1,
            Ordering::Release,
            Ordering::Relaxed,
        ) {
            Ok(_) => true,
            Err(_) => {
                self.w_started.fetch_sub(1, Ordering::Relaxed);
                false
            }
        }
    }

    fn poll_one(&self) -> Option<u8> {
        let read_start = self.r_started.fetch_add(1, Ordering::Relaxed);
        let w_finished = self.w_finished.load(Ordering::Acquire);
        if read_start >= w_finished {
            self.r_started.fetch_sub(1, Ordering::Relaxed);
            return None;
        }
        let idx = (read_start as usize) % CAPACITY;
        let value = unsafe { (*self.storage.get())[idx] };
        Some(value)
    }
}

#[test]
fn loom_two_writers_one_reader_no_phantom_reads() {
    loom::model(|| {
        let ring = Arc::new(LoomRing::new());

        let r1 = Arc::clone(&ring);
        let writer_a = thread::spawn(move || {
            r1.offer_one(1);
        });

        let r2 = Arc::clone(&ring);
        let writer_b = thread::spawn(move || {
            r2.offer_one(2);
        });

        let mut seen = Vec::new();
        for _ in 0..2 {
            if let Some(v) = ring.poll_one() {
                seen.push(v);
            }
        }

        writer_a.join().unwrap();
        writer_b.join().unwrap();

        for v in &seen {
            assert!(*v == 1 || *v == 2, "phantom byte observed: {v}");
        }
    });
}

#[test]
fn loom_single_writer_reader_never_outpaces_publish() {
    loom::model(|| {
        let ring = Arc::new(LoomRing::new());

        let writer_ring = Arc::clone(&ring);
        let writer = thread::spawn(move || {
            writer_ring.offer_one(7);
        });

        let first = ring.poll_one();
        if let Some(v) = first {
            assert_eq!(v, 7);
        }

        writer.join().unwrap();
    });
}
