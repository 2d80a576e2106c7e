//! Consumer-side generator adapters that reseed themselves from a ring.

use crate::cancel::CancellationToken;
use crate::jump::JumpableGenerator;
use crate::ring::Ring;
use rand_core::{RngCore, SeedableRng};
use std::cell::RefCell;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Weak;

/// Builds a fresh generator instance from a seed byte buffer.
///
/// Any `Fn(&[u8]) -> R` closure satisfies this via the blanket impl below.
pub trait GeneratorFactory<R> {
    /// Constructs a generator fully determined by `seed`.
    fn from_seed(&self, seed: &[u8]) -> R;
}

impl<R, F: Fn(&[u8]) -> R> GeneratorFactory<R> for F {
    fn from_seed(&self, seed: &[u8]) -> R {
        self(seed)
    }
}

fn blocking_read_or_panic(ring: &Weak<Ring>, seed: &mut [u8], cancel: &CancellationToken) {
    let Some(r) = ring.upgrade() else {
        panic!("ring dropped before consumer could perform its initial seed read");
    };
    let len = seed.len();
    r.read(seed, 0, len, cancel)
        .expect("initial seed read was cancelled");
}

/// A generator adapter that lazily constructs an underlying generator from
/// the ring and opportunistically replaces it whenever a fresh seed is
/// available.
pub struct ReplacingRng<R, F> {
    ring: Weak<Ring>,
    factory: F,
    scratch: Vec<u8>,
    current: Option<R>,
    cancel: CancellationToken,
    reseed_count: u64,
}

impl<R, F: GeneratorFactory<R>> ReplacingRng<R, F> {
    /// Creates a new adapter with seed size `seed_len`.
    #[must_use]
    pub fn new(ring: Weak<Ring>, factory: F, seed_len: usize, cancel: CancellationToken) -> Self {
        Self {
            ring,
            factory,
            scratch: vec![0u8; seed_len],
            current: None,
            cancel,
            reseed_count: 0,
        }
    }

    /// Number of times the underlying generator has been (re)constructed,
    /// including the initial lazy construction.
    #[must_use]
    pub fn reseed_count(&self) -> u64 {
        self.reseed_count
    }

    fn ensure_current(&mut self) -> &mut R {
        if self.current.is_none() {
            blocking_read_or_panic(&self.ring, &mut self.scratch, &self.cancel);
            self.current = Some(self.factory.from_seed(&self.scratch));
            self.reseed_count += 1;
        } else if let Some(r) = self.ring.upgrade() {
            let len = self.scratch.len();
            if let Ok(true) = r.poll_exact(&mut self.scratch, 0, len) {
                self.current = Some(self.factory.from_seed(&self.scratch));
                self.reseed_count += 1;
            }
        }
        self.current.as_mut().expect("initialized above")
    }
}

impl<R: RngCore, F: GeneratorFactory<R>> RngCore for ReplacingRng<R, F> {
    fn next_u32(&mut self) -> u32 {
        self.ensure_current().next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.ensure_current().next_u64()
    }

    fn fill_bytes(&mut self, dst: &mut [u8]) {
        self.ensure_current().fill_bytes(dst);
    }
}

/// Same contract as [`ReplacingRng`], but the current underlying generator is
/// a per-thread slot rather than a field on `self`. `split` returns a clone
/// sharing the ring, factory, and seed size but not the thread-local slot.
///
/// Each adapter is assigned a unique id at construction so that distinct
/// instances (even of the same generator type, even on the same thread)
/// never alias each other's per-thread state.
pub struct ThreadLocalReplacingRng<R, F> {
    id: u64,
    ring: Weak<Ring>,
    factory: F,
    seed_len: usize,
    cancel: CancellationToken,
    _marker: std::marker::PhantomData<R>,
}

static NEXT_ADAPTER_ID: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);

thread_local! {
    static SLOTS: RefCell<std::collections::HashMap<u64, Box<dyn std::any::Any>>> =
        RefCell::new(std::collections::HashMap::new());
}

impl<R: 'static, F: GeneratorFactory<R> + Clone> ThreadLocalReplacingRng<R, F> {
    /// Creates a new adapter with seed size `seed_len`.
    #[must_use]
    pub fn new(ring: Weak<Ring>, factory: F, seed_len: usize, cancel: CancellationToken) -> Self {
        Self {
            id: NEXT_ADAPTER_ID.fetch_add(1, Ordering::Relaxed),
            ring,
            factory,
            seed_len,
            cancel,
            _marker: std::marker::PhantomData,
        }
    }

    /// Returns a handle sharing this adapter's ring, factory, and seed size,
    /// but with its own id and therefore its own per-thread generator state.
    /// Each thread maintains its own underlying generator, so no cross-thread
    /// state is duplicated.
    #[must_use]
    pub fn split(&self) -> Self {
        Self {
            id: NEXT_ADAPTER_ID.fetch_add(1, Ordering::Relaxed),
            ring: self.ring.clone(),
            factory: self.factory.clone(),
            seed_len: self.seed_len,
            cancel: self.cancel.clone(),
            _marker: std::marker::PhantomData,
        }
    }

    fn with_current<T>(&self, f: impl FnOnce(&mut R) -> T) -> T {
        SLOTS.with(|slots| {
            let mut slots = slots.borrow_mut();
            if !slots.contains_key(&self.id) {
                let mut seed = vec![0u8; self.seed_len];
                blocking_read_or_panic(&self.ring, &mut seed, &self.cancel);
                slots.insert(self.id, Box::new(self.factory.from_seed(&seed)));
            } else if let Some(r) = self.ring.upgrade() {
                let mut seed = vec![0u8; self.seed_len];
                if let Ok(true) = r.poll_exact(&mut seed, 0, self.seed_len) {
                    slots.insert(self.id, Box::new(self.factory.from_seed(&seed)));
                }
            }
            let boxed = slots.get_mut(&self.id).expect("initialized above");
            let generator = boxed
                .downcast_mut::<R>()
                .expect("thread-local slot type mismatch");
            f(generator)
        })
    }
}

impl<R: RngCore + 'static, F: GeneratorFactory<R> + Clone> RngCore for ThreadLocalReplacingRng<R, F> {
    fn next_u32(&mut self) -> u32 {
        self.with_current(RngCore::next_u32)
    }

    fn next_u64(&mut self) -> u64 {
        self.with_current(RngCore::next_u64)
    }

    fn fill_bytes(&mut self, dst: &mut [u8]) {
        self.with_current(|g| g.fill_bytes(dst));
    }
}

/// A generator adapter that draws its seed bytes from a supplied splittable
/// generator `G` (itself split into an independent clone via
/// [`rand::Rng::gen`]) instead of from the ring.
pub struct SplittableSeededRng<G, R, F> {
    splitter: G,
    factory: F,
    seed_len: usize,
    current: Option<R>,
}

impl<G, R, F> SplittableSeededRng<G, R, F>
where
    G: SeedableRng + RngCore + Clone,
    F: GeneratorFactory<R>,
{
    /// Creates a new adapter seeding from `splitter`.
    #[must_use]
    pub fn new(splitter: G, factory: F, seed_len: usize) -> Self {
        Self {
            splitter,
            factory,
            seed_len,
            current: None,
        }
    }

    fn ensure_current(&mut self) -> &mut R {
        if self.current.is_none() {
            let mut seed = vec![0u8; self.seed_len];
            self.splitter.fill_bytes(&mut seed);
            self.current = Some(self.factory.from_seed(&seed));
        }
        self.current.as_mut().expect("initialized above")
    }

    /// Splits off an independent adapter: draws fresh bytes from this
    /// adapter's splitter to seed a brand new child splitter, so parent and
    /// child generator streams diverge immediately and never share seed
    /// material.
    pub fn split(&mut self) -> Self
    where
        F: Clone,
        G::Seed: Default + AsMut<[u8]>,
    {
        let mut seed = G::Seed::default();
        self.splitter.fill_bytes(seed.as_mut());
        let child_splitter = G::from_seed(seed);
        Self {
            splitter: child_splitter,
            factory: self.factory.clone(),
            seed_len: self.seed_len,
            current: None,
        }
    }
}

impl<G, R, F> RngCore for SplittableSeededRng<G, R, F>
where
    G: SeedableRng + RngCore + Clone,
    R: RngCore,
    F: GeneratorFactory<R>,
{
    fn next_u32(&mut self) -> u32 {
        self.ensure_current().next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.ensure_current().next_u64()
    }

    fn fill_bytes(&mut self, dst: &mut [u8]) {
        self.ensure_current().fill_bytes(dst);
    }
}

/// Wraps [`ReplacingRng`] with an advisory signed bit counter, decremented by
/// each primitive's bit width and reset to `seed_len * 8` on reseed.
pub struct EntropyCountingRng<R, F> {
    inner: ReplacingRng<R, F>,
    seed_bits: i64,
    entropy_bits: AtomicI64,
    last_seen_reseed: u64,
}

impl<R, F: GeneratorFactory<R>> EntropyCountingRng<R, F> {
    /// Creates a new counting adapter with seed size `seed_len`.
    #[must_use]
    pub fn new(ring: Weak<Ring>, factory: F, seed_len: usize, cancel: CancellationToken) -> Self {
        let seed_bits = (seed_len as i64) * 8;
        Self {
            inner: ReplacingRng::new(ring, factory, seed_len, cancel),
            seed_bits,
            entropy_bits: AtomicI64::new(seed_bits),
            last_seen_reseed: 0,
        }
    }

    /// Returns the current advisory entropy bit count; may be negative if
    /// the caller keeps consuming past zero.
    #[must_use]
    pub fn entropy_bits(&self) -> i64 {
        self.entropy_bits.load(Ordering::Relaxed)
    }

    /// Forces the next operation to reseed, by discarding the current
    /// underlying generator.
    pub fn force_reseed(&mut self) {
        self.inner.current = None;
    }

    fn debit(&mut self, bits: i64) {
        if self.inner.reseed_count() != self.last_seen_reseed {
            self.last_seen_reseed = self.inner.reseed_count();
            self.entropy_bits.store(self.seed_bits, Ordering::Relaxed);
        }
        self.entropy_bits.fetch_sub(bits, Ordering::Relaxed);
    }
}

impl<R: RngCore, F: GeneratorFactory<R>> RngCore for EntropyCountingRng<R, F> {
    fn next_u32(&mut self) -> u32 {
        let v = self.inner.next_u32();
        self.debit(32);
        v
    }

    fn next_u64(&mut self) -> u64 {
        let v = self.inner.next_u64();
        self.debit(64);
        v
    }

    fn fill_bytes(&mut self, dst: &mut [u8]) {
        self.inner.fill_bytes(dst);
        self.debit((dst.len() as i64) * 8);
    }
}

/// A generator adapter for underlying generators whose state space makes
/// distinct jump distances effectively independent: on each request, it
/// opportunistically polls a fresh seed and jumps the generator forward by
/// the seed's bit pattern rather than replacing its state outright.
///
/// `seed_len` may exceed the underlying generator's native state width
/// (e.g. a seed larger than 8 bytes driving a 64-bit generator): bit
/// positions beyond what `R::jump_power_of_two` can represent as a distinct
/// jump distance are passed through unchanged, and a well-behaved
/// [`JumpableGenerator`] treats them as a no-op (see [`JumpLcg64`]) rather
/// than panicking, so any `seed_len` is a valid construction.
pub struct JumpReseededRng<R> {
    ring: Weak<Ring>,
    seed_len: usize,
    cancel: CancellationToken,
    generator: R,
}

impl<R: JumpableGenerator + SeedableRng> JumpReseededRng<R> {
    /// Creates a new adapter, performing the initial blocking seed read and
    /// construction immediately.
    #[must_use]
    pub fn new(ring: Weak<Ring>, seed_len: usize, cancel: CancellationToken) -> Self
    where
        R::Seed: Default + AsMut<[u8]>,
    {
        let mut seed = vec![0u8; seed_len];
        blocking_read_or_panic(&ring, &mut seed, &cancel);
        let generator = seed_to_generator::<R>(&seed);
        Self {
            ring,
            seed_len,
            cancel,
            generator,
        }
    }

    fn jump_by_seed(&mut self, seed: &[u8]) {
        for (byte_idx, byte) in seed.iter().enumerate() {
            for bit_idx in 0..8u32 {
                if byte & (1 << bit_idx) != 0 {
                    let i = (byte_idx as u32) * 8 + bit_idx;
                    self.generator.jump_power_of_two(i);
                }
            }
        }
    }

    fn maybe_jump(&mut self) {
        if let Some(r) = self.ring.upgrade() {
            let mut seed = vec![0u8; self.seed_len];
            if let Ok(true) = r.poll_exact(&mut seed, 0, self.seed_len) {
                self.jump_by_seed(&seed);
            }
        }
    }

    /// Returns an independent adapter seeded from a fresh `seed_len` bytes
    /// drawn (blocking) from the ring.
    #[must_use]
    pub fn split(&self) -> Self
    where
        R::Seed: Default + AsMut<[u8]>,
    {
        Self::new(self.ring.clone(), self.seed_len, self.cancel.clone())
    }
}

fn seed_to_generator<R: SeedableRng>(seed: &[u8]) -> R
where
    R::Seed: Default + AsMut<[u8]>,
{
    let mut s = R::Seed::default();
    let bytes = s.as_mut();
    let n = bytes.len().min(seed.len());
    bytes[..n].copy_from_slice(&seed[..n]);
    R::from_seed(s)
}

impl<R: JumpableGenerator> RngCore for JumpReseededRng<R> {
    fn next_u32(&mut self) -> u32 {
        self.maybe_jump();
        self.generator.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.maybe_jump();
        self.generator.next_u64()
    }

    fn fill_bytes(&mut self, dst: &mut [u8]) {
        self.maybe_jump();
        self.generator.fill_bytes(dst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RingConfig;
    use crate::jump::JumpLcg64;
    use std::sync::Arc;

    fn lcg_factory(seed: &[u8]) -> JumpLcg64 {
        let mut s = [0u8; 8];
        let n = s.len().min(seed.len());
        s[..n].copy_from_slice(&seed[..n]);
        JumpLcg64::from_seed(s)
    }

    #[test]
    fn replacing_rng_lazily_initializes_from_ring() {
        let ring = Arc::new(Ring::new(RingConfig::new(64, false).unwrap()));
        let data: Vec<u8> = (0..8).collect();
        ring.offer(&data, 0, 8).unwrap();

        let weak = Arc::downgrade(&ring);
        let mut rng = ReplacingRng::new(weak, lcg_factory, 8, CancellationToken::new());
        let _ = rng.next_u64();
    }

    #[test]
    fn entropy_counting_rng_debits_on_use() {
        let ring = Arc::new(Ring::new(RingConfig::new(64, false).unwrap()));
        let data: Vec<u8> = (0..8).collect();
        ring.offer(&data, 0, 8).unwrap();
        let weak = Arc::downgrade(&ring);

        let mut rng = EntropyCountingRng::new(weak, lcg_factory, 8, CancellationToken::new());
        assert_eq!(rng.entropy_bits(), 64);
        let _ = rng.next_u64();
        assert_eq!(rng.entropy_bits(), 0);
    }

    #[test]
    fn jump_reseeded_rng_advances_without_replacing_state() {
        let ring = Arc::new(Ring::new(RingConfig::new(64, false).unwrap()));
        let seed: Vec<u8> = vec![1, 0, 0, 0, 0, 0, 0, 0];
        ring.offer(&seed, 0, 8).unwrap();
        let weak = Arc::downgrade(&ring);

        let mut rng: JumpReseededRng<JumpLcg64> =
            JumpReseededRng::new(weak, 8, CancellationToken::new());
        let a = rng.next_u64();
        let b = rng.next_u64();
        assert_ne!(a, b);
    }

    #[test]
    fn jump_reseeded_rng_tolerates_seed_wider_than_generator_state() {
        // seed_len of 16 bytes drives a 64-bit JumpLcg64; bits at position
        // 64 and above must not panic.
        let ring = Arc::new(Ring::new(RingConfig::new(64, false).unwrap()));
        let seed: Vec<u8> = vec![0xFF; 16];
        ring.offer(&seed, 0, 16).unwrap();
        let weak = Arc::downgrade(&ring);

        let mut rng: JumpReseededRng<JumpLcg64> =
            JumpReseededRng::new(weak, 16, CancellationToken::new());
        let _ = rng.next_u64();
    }

    #[test]
    fn thread_local_replacing_rng_split_shares_ring_not_slot() {
        let ring = Arc::new(Ring::new(RingConfig::new(64, false).unwrap()));
        let data: Vec<u8> = (0..8).collect();
        ring.offer(&data, 0, 8).unwrap();
        let weak = Arc::downgrade(&ring);

        let mut rng =
            ThreadLocalReplacingRng::new(weak, lcg_factory, 8, CancellationToken::new());
        let mut split = rng.split();
        let _ = rng.next_u32();
        let _ = split.next_u32();
    }
}
