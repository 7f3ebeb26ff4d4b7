//! Random token generation with collision avoidance.
//!
//! A replica claims its ring positions as unsigned 32-bit tokens. Tokens must
//! be unique across the whole ring, so generation takes the set of tokens
//! already claimed by any replica and draws random values disjoint from it
//! (and from each other).

use rand::Rng;
use std::collections::HashSet;

/// Generates random, collision-free ring tokens.
#[derive(Debug, Default)]
pub struct TokenGenerator;

impl TokenGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Generate `count` tokens disjoint from `taken` and from each other.
    pub fn generate(&self, count: usize, taken: &[u32]) -> Vec<u32> {
        let mut used: HashSet<u32> = taken.iter().copied().collect();
        let mut tokens = Vec::with_capacity(count);
        let mut rng = rand::thread_rng();

        while tokens.len() < count {
            let candidate: u32 = rng.gen();
            if used.insert(candidate) {
                tokens.push(candidate);
            }
        }

        tokens
    }
}
