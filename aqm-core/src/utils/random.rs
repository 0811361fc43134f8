use std::sync::atomic::{AtomicU64, Ordering};

use rand::{rngs::StdRng, Rng, SeedableRng};

const DEFAULT_SEED: u64 = 42;

static NEXT_DEFAULT_STREAM: AtomicU64 = AtomicU64::new(0);

/// Seedable uniform source owned by a single policy instance.
#[derive(Debug, Clone)]
pub struct UniformRandom {
    rng: StdRng,
    stream: Option<i64>,
}

impl UniformRandom {
    /// Every source created this way starts on its own default stream, so
    /// instances in one process do not draw the same sequence.
    pub fn new() -> Self {
        let offset = NEXT_DEFAULT_STREAM.fetch_add(1, Ordering::Relaxed);
        Self::seeded(DEFAULT_SEED.wrapping_add(offset))
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            stream: None,
        }
    }

    /// Restart the generator on stream `stream`. Two sources on the same
    /// stream yield the same sequence.
    pub fn set_stream(&mut self, stream: i64) {
        self.rng = StdRng::seed_from_u64(stream as u64);
        self.stream = Some(stream);
    }

    pub fn stream(&self) -> Option<i64> {
        self.stream
    }

    /// A sample in [0, 1).
    pub fn sample(&mut self) -> f64 {
        self.rng.random::<f64>()
    }
}

impl Default for UniformRandom {
    fn default() -> Self {
        Self::new()
    }
}
