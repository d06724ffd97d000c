// Deterministic, forkable pseudo-random number generator for search rollouts.
//
// Implements xoshiro256++ (Blackman & Vigna, 2019) with SplitMix64 seeding.
// The search layer in `contrapunctus_music` runs many random rollouts in
// parallel; each rollout gets its own `SearchRng` derived from the run seed
// with `fork`, so no generator is ever shared between threads and a run is
// reproducible for a given seed no matter how work is scheduled.
//
// Determinism is the one hard requirement here. Every method must produce
// identical output for identical prior state on every platform, so the
// generator and its sampling use integer arithmetic only.

use serde::{Deserialize, Serialize};

/// Multiplier used to spread stream identifiers before reseeding.
const STREAM_SPREAD: u64 = 0x9e37_79b9_7f4a_7c15;

/// Xoshiro256++ generator with support for deriving independent child streams.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRng {
    s: [u64; 4],
}

impl SearchRng {
    /// Create a generator from a `u64` seed, expanded to 256 bits of state
    /// with SplitMix64.
    pub fn new(seed: u64) -> Self {
        let mut sm = seed;
        Self {
            s: [
                splitmix64(&mut sm),
                splitmix64(&mut sm),
                splitmix64(&mut sm),
                splitmix64(&mut sm),
            ],
        }
    }

    /// Derive a child generator for the given stream identifier.
    ///
    /// The parent is not advanced, so forking the same parent with the same
    /// stream always yields the same child. Distinct streams give unrelated
    /// sequences.
    pub fn fork(&self, stream: u64) -> Self {
        let mut sm = self.s[0]
            ^ self.s[1].rotate_left(13)
            ^ self.s[2].rotate_left(29)
            ^ self.s[3].rotate_left(47)
            ^ stream.wrapping_add(1).wrapping_mul(STREAM_SPREAD);
        // Burn one output so that neighbouring streams do not share a prefix
        // of SplitMix64 state.
        splitmix64(&mut sm);
        Self {
            s: [
                splitmix64(&mut sm),
                splitmix64(&mut sm),
                splitmix64(&mut sm),
                splitmix64(&mut sm),
            ],
        }
    }

    /// Next raw `u64`.
    pub fn next_u64(&mut self) -> u64 {
        let result = (self.s[0].wrapping_add(self.s[3]))
            .rotate_left(23)
            .wrapping_add(self.s[0]);

        let t = self.s[1] << 17;

        self.s[2] ^= self.s[0];
        self.s[3] ^= self.s[1];
        self.s[1] ^= self.s[2];
        self.s[0] ^= self.s[3];

        self.s[2] ^= t;
        self.s[3] = self.s[3].rotate_left(45);

        result
    }

    /// Uniform integer in `[0, bound)` without modulo bias.
    ///
    /// Panics if `bound == 0`.
    pub fn below(&mut self, bound: u64) -> u64 {
        assert!(bound > 0, "below: bound must be positive");
        if bound.is_power_of_two() {
            return self.next_u64() & (bound - 1);
        }
        let threshold = bound.wrapping_neg() % bound;
        loop {
            let r = self.next_u64();
            if r >= threshold {
                return r % bound;
            }
        }
    }

    /// Pick one element uniformly, or `None` for an empty slice.
    pub fn choose<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            return None;
        }
        let index = self.below(items.len() as u64) as usize;
        items.get(index)
    }
}

/// SplitMix64 step, used only to expand seeds into xoshiro state.
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}
