//! Softmax gradient boosting over regression trees.
//!
//! Each round fits one tree per class to the residual (label − probability)
//! and adds `learning_rate × tree` to that class's raw score. Initial scores
//! are the log class priors of the training rows.

use super::tree::{Gradients, RegressionTree, TreeParams};
use crate::rng::StageRng;
use serde::{Deserialize, Serialize};

const MIN_PRIOR: f64 = 1e-6;

#[derive(Debug, Clone, Copy)]
pub struct BoostingParams {
    pub n_estimators:     usize,
    pub learning_rate:    f64,
    pub max_depth:        usize,
    pub min_samples_leaf: usize,
    pub subsample:        f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoosting {
    pub initial_scores: Vec<f64>,
    pub learning_rate:  f64,
    /// rounds[round][class]
    pub rounds:         Vec<Vec<RegressionTree>>,
}

/// Numerically stable softmax.
pub fn softmax(scores: &[f64]) -> Vec<f64> {
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = scores.iter().map(|s| (s - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

impl GradientBoosting {
    /// Fit on all rows of `x` with class indices `y` in `0..n_classes`.
    /// Returns the model and the raw per-feature impurity reductions.
    pub fn fit(
        x: &[Vec<f64>],
        y: &[usize],
        n_classes: usize,
        params: &BoostingParams,
        rng: &mut StageRng,
    ) -> (Self, Vec<f64>) {
        let n = x.len();
        let width = x.first().map(Vec::len).unwrap_or(0);
        let mut importance = vec![0.0; width];

        let mut counts = vec![0usize; n_classes];
        for &label in y {
            counts[label] += 1;
        }
        let initial_scores: Vec<f64> = counts
            .iter()
            .map(|&c| (c as f64 / n.max(1) as f64).max(MIN_PRIOR).ln())
            .collect();

        let tree_params = TreeParams {
            max_depth:        params.max_depth,
            min_samples_leaf: params.min_samples_leaf,
            leaf_scale:       (n_classes as f64 - 1.0) / n_classes as f64,
        };

        let mut raw: Vec<Vec<f64>> = vec![initial_scores.clone(); n];
        let mut rounds = Vec::with_capacity(params.n_estimators);
        let sample_size = ((n as f64 * params.subsample).round() as usize).clamp(1, n.max(1));

        for _ in 0..params.n_estimators {
            let probs: Vec<Vec<f64>> = raw.iter().map(|s| softmax(s)).collect();
            let rows: Vec<usize> = if sample_size < n {
                rng.sample_indices(n, sample_size)
            } else {
                (0..n).collect()
            };

            let mut trees = Vec::with_capacity(n_classes);
            for class in 0..n_classes {
                let grad: Vec<f64> = (0..n)
                    .map(|i| {
                        let target = if y[i] == class { 1.0 } else { 0.0 };
                        target - probs[i][class]
                    })
                    .collect();
                let hess: Vec<f64> = (0..n).map(|i| probs[i][class] * (1.0 - probs[i][class])).collect();
                let tree = RegressionTree::fit(
                    x,
                    &rows,
                    &Gradients { grad: &grad, hess: &hess },
                    &tree_params,
                    &mut importance,
                );
                trees.push(tree);
            }

            for (i, scores) in raw.iter_mut().enumerate() {
                for (class, tree) in trees.iter().enumerate() {
                    scores[class] += params.learning_rate * tree.predict(&x[i]);
                }
            }
            rounds.push(trees);
        }

        let model = Self {
            initial_scores,
            learning_rate: params.learning_rate,
            rounds,
        };
        (model, importance)
    }

    pub fn raw_scores(&self, row: &[f64]) -> Vec<f64> {
        let mut scores = self.initial_scores.clone();
        for trees in &self.rounds {
            for (class, tree) in trees.iter().enumerate() {
                scores[class] += self.learning_rate * tree.predict(row);
            }
        }
        scores
    }

    pub fn predict_proba(&self, row: &[f64]) -> Vec<f64> {
        softmax(&self.raw_scores(row))
    }
}

/// Index of the largest value; the first one wins a tie.
pub fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::{RngBank, RngSlot};

    #[test]
    fn softmax_sums_to_one() {
        let p = softmax(&[1.0, 2.0, 3.0]);
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(p[2] > p[1] && p[1] > p[0]);
    }

    #[test]
    fn learns_a_separable_problem() {
        let x: Vec<Vec<f64>> = (0..9).map(|i| vec![i as f64]).collect();
        let y: Vec<usize> = (0..9).map(|i| i / 3).collect();
        let params = BoostingParams {
            n_estimators:     50,
            learning_rate:    0.3,
            max_depth:        2,
            min_samples_leaf: 1,
            subsample:        1.0,
        };
        let mut rng = RngBank::new(7).for_slot(RngSlot::Boosting);
        let (model, importance) = GradientBoosting::fit(&x, &y, 3, &params, &mut rng);
        for (row, label) in x.iter().zip(&y) {
            assert_eq!(argmax(&model.predict_proba(row)), *label);
        }
        assert!(importance[0] > 0.0);
    }
}
