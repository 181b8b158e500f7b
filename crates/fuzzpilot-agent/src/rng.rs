//! Per-stream RNG seeding with ChaCha8.
//!
//! Weight initialization and action sampling draw from separate streams
//! seeded from `(seed + stream)`, so changing the network width never shifts
//! the sequence of sampled actions for a given seed.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Stream used to initialize network parameters.
pub const INIT_STREAM: u64 = 0;
/// Stream used to sample actions.
pub const SAMPLE_STREAM: u64 = 1;

pub fn stream_rng(seed: u64, stream: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed.wrapping_add(stream))
}
