use rand::{rngs::SmallRng, SeedableRng};

/// Per-core execution context.
///
/// Components that need identity or randomness receive one of these at
/// construction instead of reaching for process-wide state, so tests can run
/// any number of independent instances side by side.
#[derive(Debug)]
pub struct CoreContext {
    core_id: u8,
    rng: SmallRng,
}

impl CoreContext {
    /// Creates a context for `core_id`. The RNG stream is derived from both
    /// the seed and the core id, so two cores built from the same seed do
    /// not share a random sequence.
    pub fn new(core_id: u8, seed: u64) -> Self {
        Self {
            core_id,
            rng: SmallRng::seed_from_u64(seed ^ ((core_id as u64 + 1) << 32)),
        }
    }

    pub fn core_id(&self) -> u8 {
        self.core_id
    }

    pub fn rng(&mut self) -> &mut SmallRng {
        &mut self.rng
    }
}
