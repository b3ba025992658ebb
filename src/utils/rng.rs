//! Seeding for environment instances and batched seed derivation.
//!
//! Every instance owns one [`RngStream`]. A batch seeded from a single root
//! draws slot `i`'s seed from position `i` of a SplitMix64 sequence, so a slot
//! keeps its seed when the batch grows.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Per-instance PRNG.
pub type RngStream = ChaCha8Rng;

const GOLDEN_GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;

/// Endless SplitMix64 sequence of sub-seeds derived from a root seed.
#[derive(Clone, Debug)]
pub struct SeedSequence {
    state: u64,
}

impl SeedSequence {
    pub fn new(root: u64) -> Self { Self { state: root } }

    /// An RNG stream seeded from the next sub-seed.
    pub fn next_rng(&mut self) -> RngStream {
        let seed = self.next().unwrap_or_default();
        rng_from_seed(seed)
    }
}

impl Iterator for SeedSequence {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        self.state = self.state.wrapping_add(GOLDEN_GAMMA);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        Some(z ^ (z >> 31))
    }
}

/// The first `n` sub-seeds of `root`, one per slot.
pub fn split_n(root: u64, n: usize) -> Vec<u64> {
    SeedSequence::new(root).take(n).collect()
}

pub fn rng_from_seed(seed: u64) -> RngStream {
    RngStream::seed_from_u64(seed)
}

/// `None` reseeds from OS entropy.
pub fn rng_from_optional_seed(seed: Option<u64>) -> RngStream {
    match seed {
        Some(s) => rng_from_seed(s),
        None => RngStream::from_entropy(),
    }
}
