//! Regression tree fitted to one class's gradient.
//!
//! Splits minimize squared error of the gradient; leaves hold a Newton
//! step (sum of gradients over sum of hessians). Candidate thresholds are
//! midpoints between adjacent distinct values, scanned in feature order,
//! so ties resolve to the lowest feature index and threshold.

use serde::{Deserialize, Serialize};

const MIN_GAIN: f64 = 1e-12;
const MIN_HESSIAN: f64 = 1e-12;

#[derive(Debug, Clone, Copy)]
pub struct TreeParams {
    pub max_depth:        usize,
    pub min_samples_leaf: usize,
    /// Multiplier applied to every Newton leaf value.
    pub leaf_scale:       f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature:   usize,
        threshold: f64,
        left:      Box<Node>,
        right:     Box<Node>,
    },
}

/// Per-row training signal for one class.
pub struct Gradients<'a> {
    pub grad: &'a [f64],
    pub hess: &'a [f64],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    root: Node,
}

struct BestSplit {
    feature:   usize,
    threshold: f64,
    gain:      f64,
}

impl RegressionTree {
    /// Fit on `rows` of `x`. Squared-error reductions of accepted splits
    /// are added to `importance[feature]`.
    pub fn fit(
        x: &[Vec<f64>],
        rows: &[usize],
        signal: &Gradients<'_>,
        params: &TreeParams,
        importance: &mut [f64],
    ) -> Self {
        let mut rows = rows.to_vec();
        let root = grow(x, &mut rows, signal, params, 0, importance);
        Self { root }
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut node = &self.root;
        loop {
            match node {
                Node::Leaf { value } => return *value,
                Node::Split { feature, threshold, left, right } => {
                    let v = row.get(*feature).copied().unwrap_or(0.0);
                    node = if v <= *threshold { left } else { right };
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        fn walk(node: &Node) -> usize {
            match node {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(left).max(walk(right)),
            }
        }
        walk(&self.root)
    }
}

fn leaf(rows: &[usize], signal: &Gradients<'_>, params: &TreeParams) -> Node {
    let g: f64 = rows.iter().map(|&r| signal.grad[r]).sum();
    let h: f64 = rows.iter().map(|&r| signal.hess[r]).sum();
    Node::Leaf { value: params.leaf_scale * g / h.max(MIN_HESSIAN) }
}

fn grow(
    x: &[Vec<f64>],
    rows: &mut [usize],
    signal: &Gradients<'_>,
    params: &TreeParams,
    depth: usize,
    importance: &mut [f64],
) -> Node {
    let min_leaf = params.min_samples_leaf.max(1);
    if depth >= params.max_depth || rows.len() < 2 * min_leaf {
        return leaf(rows, signal, params);
    }
    let Some(best) = best_split(x, rows, signal.grad, min_leaf) else {
        return leaf(rows, signal, params);
    };

    if let Some(slot) = importance.get_mut(best.feature) {
        *slot += best.gain;
    }
    let (mut left, mut right): (Vec<usize>, Vec<usize>) = rows
        .iter()
        .copied()
        .partition(|&r| x[r][best.feature] <= best.threshold);
    Node::Split {
        feature:   best.feature,
        threshold: best.threshold,
        left:      Box::new(grow(x, &mut left, signal, params, depth + 1, importance)),
        right:     Box::new(grow(x, &mut right, signal, params, depth + 1, importance)),
    }
}

fn best_split(x: &[Vec<f64>], rows: &mut [usize], grad: &[f64], min_leaf: usize) -> Option<BestSplit> {
    let n = rows.len();
    let width = x.get(rows[0]).map(Vec::len).unwrap_or(0);
    let total: f64 = rows.iter().map(|&r| grad[r]).sum();
    let parent = total * total / n as f64;
    let mut best: Option<BestSplit> = None;

    for feature in 0..width {
        rows.sort_by(|&a, &b| x[a][feature].total_cmp(&x[b][feature]).then(a.cmp(&b)));
        let mut left_sum = 0.0;
        for i in 0..n - 1 {
            left_sum += grad[rows[i]];
            let n_left = i + 1;
            let n_right = n - n_left;
            if n_left < min_leaf || n_right < min_leaf {
                continue;
            }
            let here = x[rows[i]][feature];
            let next = x[rows[i + 1]][feature];
            if here == next {
                continue;
            }
            let right_sum = total - left_sum;
            let gain = left_sum * left_sum / n_left as f64
                + right_sum * right_sum / n_right as f64
                - parent;
            if gain > MIN_GAIN && best.as_ref().map_or(true, |b| gain > b.gain) {
                best = Some(BestSplit { feature, threshold: (here + next) / 2.0, gain });
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> TreeParams {
        TreeParams { max_depth: 3, min_samples_leaf: 1, leaf_scale: 1.0 }
    }

    #[test]
    fn separable_gradient_splits_once() {
        let x = vec![vec![0.0], vec![1.0], vec![2.0], vec![3.0]];
        let grad = [-1.0, -1.0, 1.0, 1.0];
        let hess = [1.0; 4];
        let mut importance = vec![0.0];
        let tree = RegressionTree::fit(
            &x,
            &[0, 1, 2, 3],
            &Gradients { grad: &grad, hess: &hess },
            &params(),
            &mut importance,
        );
        assert_eq!(tree.depth(), 1);
        assert_eq!(tree.predict(&[0.5]), -1.0);
        assert_eq!(tree.predict(&[2.5]), 1.0);
        assert!(importance[0] > 0.0);
    }

    #[test]
    fn constant_feature_makes_a_leaf() {
        let x = vec![vec![1.0], vec![1.0], vec![1.0]];
        let grad = [0.5, -0.5, 0.3];
        let hess = [0.25; 3];
        let mut importance = vec![0.0];
        let tree = RegressionTree::fit(
            &x,
            &[0, 1, 2],
            &Gradients { grad: &grad, hess: &hess },
            &params(),
            &mut importance,
        );
        assert_eq!(tree.depth(), 0);
        assert_eq!(importance[0], 0.0);
    }
}
