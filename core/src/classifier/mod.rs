//! Propensity classifier: a gradient-boosted tree ensemble trained on
//! bootstrapped tier labels.
//!
//! RULES:
//!   - Inputs are every model-input feature in the table schema, in
//!     column order. The propensity score itself is never an input.
//!   - All randomness comes from the RngBank seeded by the config.
//!   - Degenerate data (tiny batches, single-member classes) degrades to a
//!     simpler procedure with a warning event; it never aborts training.
//!   - A TrainedModel is immutable. Prediction checks its column list
//!     against the table and fails with SchemaMismatch on a gap.

pub mod boosting;
pub mod labels;
pub mod scaler;
pub mod tree;

use crate::{
    config::ClassifierConfig,
    error::{PipelineError, PipelineResult},
    event::PipelineEvent,
    features::{Feature, FeatureTable},
    rng::{RngBank, RngSlot, StageRng},
    types::{Tier, UnifiedId},
};
use boosting::{argmax, BoostingParams, GradientBoosting};
use labels::{CompositeRankLabels, LabelSource};
use scaler::StandardScaler;
use serde::{Deserialize, Serialize};

const N_CLASSES: usize = 3;

// ── Model ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    pub feature_columns: Vec<Feature>,
    pub scaler:          StandardScaler,
    /// Class index → tier.
    pub class_labels:    Vec<Tier>,
    pub ensemble:        GradientBoosting,
}

impl TrainedModel {
    pub fn to_blob(&self) -> PipelineResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_blob(blob: &str) -> PipelineResult<Self> {
        Ok(serde_json::from_str(blob)?)
    }

    pub fn predict(&self, features: &FeatureTable) -> PipelineResult<Vec<Prediction>> {
        if let Some(missing) = self.feature_columns.iter().find(|f| !features.has(**f)) {
            return Err(PipelineError::SchemaMismatch { column: missing.name().to_string() });
        }
        let predictions = features
            .rows()
            .iter()
            .map(|row| {
                let raw: Vec<f64> = self.feature_columns.iter().map(|f| row.number(*f)).collect();
                let probs = self.ensemble.predict_proba(&self.scaler.transform(&raw));
                let best = argmax(&probs);
                let mut probabilities = [0.0; N_CLASSES];
                for (class, p) in probs.iter().enumerate() {
                    if let Some(tier) = self.class_labels.get(class) {
                        probabilities[tier.index()] = *p;
                    }
                }
                Prediction {
                    unified_id:     row.unified_id,
                    predicted_tier: self.class_labels.get(best).copied().unwrap_or(Tier::Medium),
                    probabilities,
                    confidence:     probs[best],
                }
            })
            .collect();
        Ok(predictions)
    }
}

/// One row of the predictions table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub unified_id:     UnifiedId,
    pub predicted_tier: Tier,
    /// Indexed by `Tier::index()`: low, medium, high.
    pub probabilities:  [f64; 3],
    /// The largest class probability.
    pub confidence:     f64,
}

impl Prediction {
    pub fn probability(&self, tier: Tier) -> f64 {
        self.probabilities[tier.index()]
    }
}

// ── Training diagnostics ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub label_source:       String,
    pub train_rows:         usize,
    pub test_rows:          usize,
    pub train_accuracy:     f64,
    pub test_accuracy:      f64,
    pub cv_scores:          Vec<f64>,
    /// Normalized to sum 1, sorted descending.
    pub feature_importance: Vec<(Feature, f64)>,
    /// Label counts indexed by `Tier::index()`.
    pub label_counts:       [usize; 3],
    pub events:             Vec<PipelineEvent>,
}

impl TrainingReport {
    pub fn cv_mean(&self) -> f64 {
        if self.cv_scores.is_empty() {
            return 0.0;
        }
        self.cv_scores.iter().sum::<f64>() / self.cv_scores.len() as f64
    }
}

// ── Classifier ───────────────────────────────────────────────────────────────

pub struct PropensityClassifier {
    config: ClassifierConfig,
    labels: Box<dyn LabelSource>,
    model:  Option<TrainedModel>,
}

impl PropensityClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        let labels = Box::new(CompositeRankLabels::new(config.label_weights.clone()));
        Self::with_label_source(config, labels)
    }

    pub fn with_label_source(config: ClassifierConfig, labels: Box<dyn LabelSource>) -> Self {
        Self { config, labels, model: None }
    }

    /// Wrap a model restored from a blob.
    pub fn from_model(config: ClassifierConfig, model: TrainedModel) -> Self {
        let mut classifier = Self::new(config);
        classifier.model = Some(model);
        classifier
    }

    pub fn model(&self) -> Option<&TrainedModel> {
        self.model.as_ref()
    }

    pub fn is_trained(&self) -> bool {
        self.model.is_some()
    }

    pub fn predict(&self, features: &FeatureTable) -> PipelineResult<Vec<Prediction>> {
        self.model
            .as_ref()
            .ok_or(PipelineError::ModelNotTrained)?
            .predict(features)
    }

    pub fn train(&mut self, features: &FeatureTable) -> PipelineResult<TrainingReport> {
        if features.is_empty() {
            return Err(PipelineError::EmptyTrainingSet);
        }
        let cfg = &self.config;
        let bank = RngBank::new(cfg.seed);
        let mut events = Vec::new();

        let columns: Vec<Feature> = features.schema().filter(Feature::is_model_input).collect();
        let x: Vec<Vec<f64>> = features
            .rows()
            .iter()
            .map(|row| columns.iter().map(|f| row.number(*f)).collect())
            .collect();
        let y: Vec<usize> = self.labels.labels(features).iter().map(Tier::index).collect();
        let label_counts = class_counts(&y);

        // ── Split ──
        let n = x.len();
        let smallest_class = label_counts.iter().copied().min().unwrap_or(0);
        let (train_idx, test_idx) = if n < cfg.min_split_rows || smallest_class < cfg.min_class_rows {
            events.push(PipelineEvent::DegradedSplit { rows: n, smallest_class });
            ((0..n).collect(), (0..n).collect())
        } else {
            let mut rng = bank.for_slot(RngSlot::TrainTestSplit);
            stratified_split(&y, cfg.test_fraction, &mut rng)
        };
        let (x_train, y_train) = select(&x, &y, &train_idx);
        let (x_test, y_test) = select(&x, &y, &test_idx);

        // ── Cross-validation on the training partition ──
        let train_smallest = class_counts(&y_train)
            .into_iter()
            .filter(|&c| c > 0)
            .min()
            .unwrap_or(0);
        let folds = cfg.cv_folds.min(train_smallest);
        let mut cv_scores = Vec::new();
        if folds >= 2 {
            if folds < cfg.cv_folds {
                events.push(PipelineEvent::CrossValidationReduced { requested: cfg.cv_folds, folds });
            }
            let mut rng = bank.for_slot(RngSlot::CrossValidation);
            let assignment = stratified_folds(&y_train, folds, &mut rng);
            for fold in 0..folds {
                let fit_idx: Vec<usize> = (0..y_train.len()).filter(|&i| assignment[i] != fold).collect();
                let val_idx: Vec<usize> = (0..y_train.len()).filter(|&i| assignment[i] == fold).collect();
                let (x_fit, y_fit) = select(&x_train, &y_train, &fit_idx);
                let (x_val, y_val) = select(&x_train, &y_train, &val_idx);
                let (scaler, ensemble, _) = self.fit(&x_fit, &y_fit, columns.len(), &mut rng);
                cv_scores.push(accuracy(&scaler, &ensemble, &x_val, &y_val));
            }
        } else {
            events.push(PipelineEvent::CrossValidationSkipped { smallest_class: train_smallest });
        }

        // ── Final fit ──
        let mut rng = bank.for_slot(RngSlot::Boosting);
        let (scaler, ensemble, raw_importance) = self.fit(&x_train, &y_train, columns.len(), &mut rng);
        let train_accuracy = accuracy(&scaler, &ensemble, &x_train, &y_train);
        let test_accuracy = accuracy(&scaler, &ensemble, &x_test, &y_test);
        if cv_scores.is_empty() {
            cv_scores.push(train_accuracy);
        }

        let total: f64 = raw_importance.iter().sum();
        let mut feature_importance: Vec<(Feature, f64)> = columns
            .iter()
            .zip(&raw_importance)
            .map(|(f, v)| (*f, if total > 0.0 { v / total } else { 0.0 }))
            .collect();
        feature_importance.sort_by(|a, b| b.1.total_cmp(&a.1));

        events.push(PipelineEvent::ModelTrained {
            train_accuracy,
            test_accuracy,
            features: columns.len(),
        });
        for event in &events {
            event.log("classify");
        }
        log::info!(
            "classify: trained on {} rows ({} held out), train acc {:.3}, test acc {:.3}",
            train_idx.len(),
            test_idx.len(),
            train_accuracy,
            test_accuracy
        );

        self.model = Some(TrainedModel {
            feature_columns: columns,
            scaler,
            class_labels: Tier::ALL.to_vec(),
            ensemble,
        });

        Ok(TrainingReport {
            label_source: self.labels.name().to_string(),
            train_rows: train_idx.len(),
            test_rows: test_idx.len(),
            train_accuracy,
            test_accuracy,
            cv_scores,
            feature_importance,
            label_counts,
            events,
        })
    }

    fn fit(
        &self,
        x: &[Vec<f64>],
        y: &[usize],
        width: usize,
        rng: &mut StageRng,
    ) -> (StandardScaler, GradientBoosting, Vec<f64>) {
        let rows: Vec<&[f64]> = x.iter().map(Vec::as_slice).collect();
        let scaler = StandardScaler::fit(&rows, width);
        let scaled: Vec<Vec<f64>> = x.iter().map(|r| scaler.transform(r)).collect();
        let params = BoostingParams {
            n_estimators:     self.config.n_estimators,
            learning_rate:    self.config.learning_rate,
            max_depth:        self.config.max_depth,
            min_samples_leaf: self.config.min_samples_leaf,
            subsample:        self.config.subsample,
        };
        let (ensemble, importance) = GradientBoosting::fit(&scaled, y, N_CLASSES, &params, rng);
        (scaler, ensemble, importance)
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn class_counts(y: &[usize]) -> [usize; 3] {
    let mut counts = [0; N_CLASSES];
    for &label in y {
        counts[label] += 1;
    }
    counts
}

fn select(x: &[Vec<f64>], y: &[usize], idx: &[usize]) -> (Vec<Vec<f64>>, Vec<usize>) {
    (idx.iter().map(|&i| x[i].clone()).collect(), idx.iter().map(|&i| y[i]).collect())
}

fn accuracy(scaler: &StandardScaler, ensemble: &GradientBoosting, x: &[Vec<f64>], y: &[usize]) -> f64 {
    if x.is_empty() {
        return 0.0;
    }
    let correct = x
        .iter()
        .zip(y)
        .filter(|(row, label)| argmax(&ensemble.predict_proba(&scaler.transform(row))) == **label)
        .count();
    correct as f64 / x.len() as f64
}

/// Per-class shuffle; each class sends round(count × fraction) rows to the
/// test side, at least one and never all of them.
fn stratified_split(y: &[usize], test_fraction: f64, rng: &mut StageRng) -> (Vec<usize>, Vec<usize>) {
    let mut train = Vec::new();
    let mut test = Vec::new();
    for class in 0..N_CLASSES {
        let mut members: Vec<usize> = (0..y.len()).filter(|&i| y[i] == class).collect();
        if members.is_empty() {
            continue;
        }
        rng.shuffle(&mut members);
        let n_test = if members.len() < 2 {
            0
        } else {
            ((members.len() as f64 * test_fraction).round() as usize).clamp(1, members.len() - 1)
        };
        test.extend_from_slice(&members[..n_test]);
        train.extend_from_slice(&members[n_test..]);
    }
    train.sort_unstable();
    test.sort_unstable();
    (train, test)
}

/// Fold index per row; every class is dealt round-robin after a shuffle.
fn stratified_folds(y: &[usize], folds: usize, rng: &mut StageRng) -> Vec<usize> {
    let mut assignment = vec![0; y.len()];
    for class in 0..N_CLASSES {
        let mut members: Vec<usize> = (0..y.len()).filter(|&i| y[i] == class).collect();
        rng.shuffle(&mut members);
        for (k, i) in members.into_iter().enumerate() {
            assignment[i] = k % folds;
        }
    }
    assignment
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stratified_split_keeps_every_class_on_both_sides() {
        let y: Vec<usize> = (0..30).map(|i| i % 3).collect();
        let mut rng = RngBank::new(1).for_slot(RngSlot::TrainTestSplit);
        let (train, test) = stratified_split(&y, 0.2, &mut rng);
        assert_eq!(train.len() + test.len(), 30);
        assert_eq!(test.len(), 6);
        for class in 0..3 {
            assert!(train.iter().any(|&i| y[i] == class));
            assert!(test.iter().any(|&i| y[i] == class));
        }
    }

    #[test]
    fn folds_are_balanced_per_class() {
        let y: Vec<usize> = (0..12).map(|i| i % 3).collect();
        let mut rng = RngBank::new(1).for_slot(RngSlot::CrossValidation);
        let folds = stratified_folds(&y, 4, &mut rng);
        for fold in 0..4 {
            for class in 0..3 {
                let count = (0..12).filter(|&i| folds[i] == fold && y[i] == class).count();
                assert_eq!(count, 1);
            }
        }
    }
}
