use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Per-worker scheduling state. One context per worker thread; contexts are
/// never shared between threads.
///
/// The context is deliberately small: the worker's team id, a private PRNG for
/// steal-victim selection, and the static policy's trip counter. Everything
/// else a dispatcher needs lives in the [`WorkShare`](crate::WorkShare) itself,
/// indexed by the team id.
pub struct ThreadContext {
    team_id: usize,
    rng: SmallRng,
    /// Static policy progress: -1 = finished, otherwise the number of chunks
    /// this worker has already taken in striped mode.
    pub(crate) static_trip: i64,
}

impl ThreadContext {
    /// A new context for the worker with the given team id, with an RNG seed
    /// derived from the id.
    pub fn new(team_id: usize) -> Self {
        // decorrelate neighboring team ids
        Self::with_seed(team_id, (team_id as u64).wrapping_mul(0x9e3779b97f4a7c15))
    }

    /// As [`new`](Self::new), with an explicit RNG seed.
    pub fn with_seed(team_id: usize, seed: u64) -> Self {
        Self {
            team_id,
            rng: SmallRng::seed_from_u64(seed),
            static_trip: 0,
        }
    }

    /// This worker's team id, in `[0, N)` for a team of `N`.
    pub fn team_id(&self) -> usize {
        self.team_id
    }

    /// Rearm the context for the next work share. Must be called between
    /// consecutive loops that reuse the same context.
    pub fn reset(&mut self) {
        self.static_trip = 0;
    }

    pub(crate) fn rand_below(&mut self, n: usize) -> usize {
        self.rng.gen_range(0..n)
    }
}
