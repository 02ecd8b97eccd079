//! Training-label bootstrap.
//!
//! There are no historical outcomes to learn from, so labels are derived
//! from the data itself: customers are ranked by a secondary composite and
//! cut into three groups of exact tercile size. The classifier therefore
//! learns to reproduce a heuristic, not ground truth. Swap the
//! `LabelSource` once real outcomes exist.

use crate::{
    config::LabelWeights,
    features::{Feature, FeatureTable},
    scoring::min_max,
    types::Tier,
};

pub trait LabelSource {
    fn name(&self) -> &'static str;

    /// One label per row of `features`, in row order.
    fn labels(&self, features: &FeatureTable) -> Vec<Tier>;
}

/// Ranks by 0.4·urgency + 0.3·rfm + 0.3·success rate (each min-max scaled).
pub struct CompositeRankLabels {
    weights: LabelWeights,
}

impl CompositeRankLabels {
    pub fn new(weights: LabelWeights) -> Self {
        Self { weights }
    }

    fn composite(&self, features: &FeatureTable) -> Vec<f64> {
        let parts = [
            (Feature::UrgencyScore,       self.weights.urgency),
            (Feature::RfmScore,           self.weights.rfm),
            (Feature::ProjectSuccessRate, self.weights.success_rate),
        ];
        let mut total = vec![0.0; features.len()];
        for (feature, weight) in parts {
            if let Some(column) = features.column(feature) {
                for (t, v) in total.iter_mut().zip(min_max(&column)) {
                    *t += weight * v;
                }
            }
        }
        total
    }
}

impl LabelSource for CompositeRankLabels {
    fn name(&self) -> &'static str {
        "composite_rank"
    }

    fn labels(&self, features: &FeatureTable) -> Vec<Tier> {
        let scores = self.composite(features);
        let rows = features.rows();

        let mut order: Vec<usize> = (0..rows.len()).collect();
        order.sort_by(|&a, &b| {
            scores[b]
                .total_cmp(&scores[a])
                .then(rows[a].unified_id.cmp(&rows[b].unified_id))
        });

        let (high, medium, _) = tercile_sizes(rows.len());
        let mut labels = vec![Tier::Low; rows.len()];
        for (rank, &i) in order.iter().enumerate() {
            labels[i] = if rank < high {
                Tier::High
            } else if rank < high + medium {
                Tier::Medium
            } else {
                Tier::Low
            };
        }
        labels
    }
}

/// (high, medium, low) group sizes; the remainder goes to the higher tiers.
pub fn tercile_sizes(n: usize) -> (usize, usize, usize) {
    let base = n / 3;
    let rem = n % 3;
    (base + usize::from(rem > 0), base + usize::from(rem > 1), base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tercile_sizes_cover_every_row() {
        assert_eq!(tercile_sizes(9), (3, 3, 3));
        assert_eq!(tercile_sizes(10), (4, 3, 3));
        assert_eq!(tercile_sizes(11), (4, 4, 3));
        assert_eq!(tercile_sizes(2), (1, 1, 0));
        assert_eq!(tercile_sizes(0), (0, 0, 0));
    }
}
