//! A lock-free concurrent byte ring buffer that bridges slow, high-entropy
//! sources (such as an operating system's cryptographic RNG) to many fast
//! consumers that periodically reseed themselves.
//!
//! Any number of producer threads push bytes into a shared [`Ring`] via
//! [`EntropyWorker`]; any number of consumer generator adapters
//! ([`ReplacingRng`], [`ThreadLocalReplacingRng`], [`SplittableSeededRng`],
//! [`EntropyCountingRng`], [`JumpReseededRng`]) pull seed material back out.
//! The ring guarantees no byte is ever read before it is written and no byte
//! is ever handed to two readers, without locks and without per-operation
//! allocation.
//!
//! # Example
//!
//! ```
//! use seedring_rs::{CancellationToken, Ring, RingConfig};
//! use std::sync::Arc;
//!
//! let ring = Arc::new(Ring::new(RingConfig::new(1024, false).unwrap()));
//! let cancel = CancellationToken::new();
//!
//! let data = vec![1u8, 2, 3, 4];
//! ring.write(&data, 0, data.len(), &cancel).unwrap();
//!
//! let mut out = vec![0u8; data.len()];
//! ring.read(&mut out, 0, out.len(), &cancel).unwrap();
//! assert_eq!(out, data);
//! ```

mod backoff;
mod cancel;
mod config;
mod consumer;
mod error;
mod invariants;
mod jump;
mod metrics;
mod producer;
mod ring;

pub use backoff::Backoff;
pub use cancel::CancellationToken;
pub use config::RingConfig;
pub use consumer::{
    EntropyCountingRng, GeneratorFactory, JumpReseededRng, ReplacingRng, SplittableSeededRng,
    ThreadLocalReplacingRng,
};
pub use error::{ProducerError, RingError};
pub use jump::{JumpLcg64, JumpableGenerator};
pub use metrics::{Metrics, MetricsSnapshot};
pub use producer::{spawn_entropy_worker, EntropySource, EntropyWorker, OsEntropySource};
pub use ring::{BlockingWriteOnWeak, Ring};
