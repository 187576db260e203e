//! Seeded linear congruential generator used for profile ordering.
//!
//! The constants are fixed so that a given seed yields the same presentation
//! order on every platform and in every release; persisted runs depend on it.

pub const LCG_MULTIPLIER: u64 = 1_103_515_245;
pub const LCG_INCREMENT: u64 = 12_345;
pub const LCG_MODULUS: u64 = 1 << 31;

/// `state' = (state * a + c) mod 2^31`, yielding `state' / 2^31` in `[0, 1)`.
#[derive(Debug, Clone)]
pub struct Lcg {
    state: u64,
}

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self {
            state: seed % LCG_MODULUS,
        }
    }

    /// Advance and return the new raw state.
    pub fn next_state(&mut self) -> u64 {
        // state < 2^31 and a < 2^31, so the product fits in u64.
        self.state = (self.state * LCG_MULTIPLIER + LCG_INCREMENT) % LCG_MODULUS;
        self.state
    }

    /// Advance and return a uniform value in `[0, 1)`.
    pub fn next_f64(&mut self) -> f64 {
        self.next_state() as f64 / LCG_MODULUS as f64
    }
}

/// Fisher–Yates shuffle driven by `rng`.
///
/// Walks `i` from `len - 1` down to 1 and swaps with `j = floor(r * (i + 1))`.
pub fn shuffle<T>(items: &mut [T], rng: &mut Lcg) {
    if items.len() < 2 {
        return;
    }
    for i in (1..items.len()).rev() {
        let j = (rng.next_f64() * (i + 1) as f64).floor() as usize;
        items.swap(i, j.min(i));
    }
}
