use serde::{Deserialize, Serialize};

/// Per-column standardization fitted on the training rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub means: Vec<f64>,
    /// Population standard deviations; a constant column stores 1.
    pub stds:  Vec<f64>,
}

impl StandardScaler {
    pub fn fit(rows: &[&[f64]], width: usize) -> Self {
        let n = rows.len().max(1) as f64;
        let mut means = vec![0.0; width];
        for row in rows {
            for (m, v) in means.iter_mut().zip(row.iter()) {
                *m += v / n;
            }
        }
        let mut vars = vec![0.0; width];
        for row in rows {
            for ((s, v), m) in vars.iter_mut().zip(row.iter()).zip(&means) {
                *s += (v - m).powi(2) / n;
            }
        }
        let stds = vars
            .into_iter()
            .map(|var| {
                let std = var.sqrt();
                if std > 0.0 && std.is_finite() { std } else { 1.0 }
            })
            .collect();
        Self { means, stds }
    }

    pub fn transform(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.means.iter().zip(&self.stds))
            .map(|(v, (m, s))| (v - m) / s)
            .collect()
    }
}
