//! Seeded random streams.
//!
//! All randomness in the crate flows through explicitly passed `StdRng`s.
//! A [`RandomStreamer`] is the root of that tree: it forks one child stream per
//! training phase so a run is reproducible from a single seed.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::Uniform;

/// Seedable source of reproducible random streams.
#[derive(Debug, Clone)]
pub struct RandomStreamer {
    seed: u64,
    rng: StdRng,
}

impl RandomStreamer {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// The seed this streamer was created with.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Split off an independent child stream.
    ///
    /// The child is seeded from the parent's next draw, so the sequence of
    /// forks is itself deterministic.
    pub fn fork(&mut self) -> StdRng {
        StdRng::seed_from_u64(self.rng.gen())
    }

    /// Child stream addressed by `key`. Does not advance the root, so keyed
    /// streams can be drawn in any order or repeatedly.
    pub fn keyed(&self, key: u64) -> StdRng {
        StdRng::seed_from_u64(self.seed ^ key.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15))
    }

    /// Direct access to the root stream.
    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }
}

/// Random permutation of `0..n`.
pub fn permutation(n: usize, rng: &mut StdRng) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(rng);
    indices
}

/// `n` draws from `Uniform[0, 1)`.
pub fn uniform_unit(n: usize, rng: &mut StdRng) -> Vec<f64> {
    let unit = Uniform::new(0.0, 1.0);
    (0..n).map(|_| rng.sample(unit)).collect()
}
