//! Seeded xorshift32 generator
//!
//! The only randomness source for the simulation and the scripted bots. The
//! state is serialized with the game state so a resumed match continues the
//! same stream.

use serde::{Deserialize, Serialize};

/// Substitute for a zero seed, which would lock xorshift at zero forever
const ZERO_SEED_REPLACEMENT: u32 = 0x9E37_79B9;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeterministicRng {
    state: u32,
}

impl DeterministicRng {
    pub fn new(seed: u32) -> Self {
        let state = if seed == 0 { ZERO_SEED_REPLACEMENT } else { seed };
        Self { state }
    }

    #[inline]
    pub fn next_u32(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x
    }

    /// Uniform-ish integer in `[0, max)`; returns 0 when `max` is 0
    #[inline]
    pub fn next_below(&mut self, max: u32) -> u32 {
        if max == 0 {
            return 0;
        }
        self.next_u32() % max
    }

    /// Integer in `[min, max]`
    pub fn range_inclusive(&mut self, min: i32, max: i32) -> i32 {
        if min >= max {
            return min;
        }
        let span = (max - min + 1) as u32;
        min + self.next_below(span) as i32
    }

    /// True with probability `percent`/100
    pub fn chance(&mut self, percent: u32) -> bool {
        self.next_below(100) < percent
    }
}
