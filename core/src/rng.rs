//! Deterministic random number generation.
//!
//! RULE: Nothing in the pipeline may call any platform RNG.
//! All randomness (train/test shuffles, fold assignment, row subsampling)
//! flows through `StageRng` instances derived from the classifier seed.
//!
//! Each consumer gets its own stream, seeded from (seed XOR slot), so
//! adding a consumer never changes existing streams.

use rand::{seq::SliceRandom, SeedableRng};
use rand_pcg::Pcg64Mcg;

/// A deterministic RNG for one consumer.
pub struct StageRng {
    inner: Pcg64Mcg,
}

impl StageRng {
    pub fn new(seed: u64, slot_index: u64) -> Self {
        let derived_seed = seed ^ (slot_index.wrapping_mul(0x9e37_79b9_7f4a_7c15));
        Self {
            inner: Pcg64Mcg::seed_from_u64(derived_seed),
        }
    }

    /// Roll a float in [0.0, 1.0).
    pub fn next_f64(&mut self) -> f64 {
        use rand::RngCore;
        let bits = self.inner.next_u64();
        (bits >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Shuffle in place (Fisher-Yates).
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        items.shuffle(&mut self.inner);
    }

    /// Draw `k` distinct indices from `0..n`, returned in ascending order.
    pub fn sample_indices(&mut self, n: usize, k: usize) -> Vec<usize> {
        let mut all: Vec<usize> = (0..n).collect();
        all.shuffle(&mut self.inner);
        all.truncate(k.min(n));
        all.sort_unstable();
        all
    }
}

/// Every stream for one training invocation.
pub struct RngBank {
    seed: u64,
}

impl RngBank {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    pub fn for_slot(&self, slot: RngSlot) -> StageRng {
        log::trace!("rng: stream {} from seed {}", slot.name(), self.seed);
        StageRng::new(self.seed, slot as u64)
    }
}

/// Stable slot assignments.
/// NEVER reorder or remove entries. Only append.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u64)]
pub enum RngSlot {
    TrainTestSplit = 0,
    CrossValidation = 1,
    Boosting = 2,
}

impl RngSlot {
    pub fn name(&self) -> &'static str {
        match self {
            Self::TrainTestSplit  => "train_test_split",
            Self::CrossValidation => "cross_validation",
            Self::Boosting        => "boosting",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_stream() {
        let bank_a = RngBank::new(7);
        let bank_b = RngBank::new(7);
        let mut a = bank_a.for_slot(RngSlot::Boosting);
        let mut b = bank_b.for_slot(RngSlot::Boosting);
        for _ in 0..32 {
            assert_eq!(a.next_f64().to_bits(), b.next_f64().to_bits());
        }
    }

    #[test]
    fn slots_are_independent_streams() {
        let bank = RngBank::new(7);
        let mut split = bank.for_slot(RngSlot::TrainTestSplit);
        let mut cv = bank.for_slot(RngSlot::CrossValidation);
        let a: Vec<u64> = (0..8).map(|_| split.next_f64().to_bits()).collect();
        let b: Vec<u64> = (0..8).map(|_| cv.next_f64().to_bits()).collect();
        assert_ne!(a, b);
    }

    #[test]
    fn sample_indices_are_sorted_and_distinct() {
        let mut rng = RngBank::new(1).for_slot(RngSlot::Boosting);
        let idx = rng.sample_indices(50, 20);
        assert_eq!(idx.len(), 20);
        assert!(idx.windows(2).all(|w| w[0] < w[1]));
        assert!(idx.iter().all(|&i| i < 50));
    }
}
