//! Long-running entropy producer workers.
//!
//! A worker repeatedly fills a staging buffer from an [`EntropySource`] and
//! pushes it into a ring via the blocking `write` extension on `Weak<Ring>`,
//! terminating gracefully when the ring is no longer reachable or its
//! [`CancellationToken`] is cancelled.

use crate::cancel::CancellationToken;
use crate::error::ProducerError;
use crate::ring::{BlockingWriteOnWeak, Ring};
use rand::rngs::OsRng;
use rand_core::RngCore;
use std::sync::Weak;
use std::thread::{self, JoinHandle};

/// A source of cryptographically strong random bytes.
pub trait EntropySource: Send + 'static {
    /// Fills `buf` with fresh random bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ProducerError::Source`] if the underlying source fails.
    fn fill(&self, buf: &mut [u8]) -> Result<(), ProducerError>;
}

/// An [`EntropySource`] backed by the operating system's cryptographic RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsEntropySource;

impl EntropySource for OsEntropySource {
    fn fill(&self, buf: &mut [u8]) -> Result<(), ProducerError> {
        OsRng.try_fill_bytes(buf).map_err(|e| ProducerError::Source(e.to_string()))
    }
}

/// A long-running worker that repeatedly draws entropy and pushes it into a
/// ring.
pub struct EntropyWorker<S: EntropySource> {
    ring: Weak<Ring>,
    source: S,
    staging: Vec<u8>,
    cancel: CancellationToken,
}

impl<S: EntropySource> EntropyWorker<S> {
    /// Creates a worker with the given staging buffer size.
    #[must_use]
    pub fn new(ring: Weak<Ring>, source: S, staging_len: usize, cancel: CancellationToken) -> Self {
        Self {
            ring,
            source,
            staging: vec![0u8; staging_len],
            cancel,
        }
    }

    /// Runs the worker loop until the ring becomes unreachable or
    /// cancellation is requested.
    pub fn run(&mut self) {
        loop {
            if self.cancel.is_cancelled() || self.ring.upgrade().is_none() {
                return;
            }
            if let Err(err) = self.source.fill(&mut self.staging) {
                eprintln!("entropy source error, continuing: {err}");
                continue;
            }
            let len = self.staging.len();
            match self.ring.blocking_write(&self.staging, 0, len, &self.cancel) {
                Ok(()) => {}
                Err(_cancelled) => return,
            }
            if self.ring.upgrade().is_none() {
                return;
            }
        }
    }
}

/// Spawns an [`EntropyWorker`] on a named, dedicated thread.
///
/// Returns the thread's `JoinHandle` and a [`CancellationToken`] the caller
/// can use to request shutdown.
pub fn spawn_entropy_worker<S: EntropySource>(
    ring: Weak<Ring>,
    source: S,
    staging_len: usize,
) -> (JoinHandle<()>, CancellationToken) {
    let cancel = CancellationToken::new();
    let worker_cancel = cancel.clone();
    let handle = thread::Builder::new()
        .name("entropy-worker".to_string())
        .spawn(move || {
            let mut worker = EntropyWorker::new(ring, source, staging_len, worker_cancel);
            worker.run();
        })
        .expect("failed to spawn entropy worker thread");
    (handle, cancel)
}
