mod common;

use common::{as_of, install_base, population};
use propensity_core::{
    classifier::{labels::LabelSource, PropensityClassifier, TrainedModel},
    config::{ClassifierConfig, PipelineConfig},
    error::PipelineError,
    event::PipelineEvent,
    features::{Feature, FeatureTable},
    pipeline::{PipelineInputs, PropensityPipeline},
    types::{SourceKind, Tier},
};

// ── Helpers ──────────────────────────────────────────────────────────────────

fn scored(inputs: PipelineInputs) -> FeatureTable {
    PropensityPipeline::build(PipelineConfig::default_test(), as_of())
        .unwrap()
        .run(inputs)
        .unwrap()
        .features
}

fn classifier() -> PropensityClassifier {
    PropensityClassifier::new(PipelineConfig::default_test().classifier)
}

fn has_event(events: &[PipelineEvent], pred: impl Fn(&PipelineEvent) -> bool) -> bool {
    events.iter().any(pred)
}

/// Labels every customer by parity of its unified id.
struct ParityLabels;

impl LabelSource for ParityLabels {
    fn name(&self) -> &'static str {
        "parity"
    }

    fn labels(&self, features: &FeatureTable) -> Vec<Tier> {
        features
            .rows()
            .iter()
            .map(|r| if r.unified_id % 2 == 0 { Tier::High } else { Tier::Low })
            .collect()
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[test]
fn trains_with_stratified_split_and_cross_validation() {
    let features = scored(population(60));
    let mut clf = classifier();

    let report = clf.train(&features).unwrap();

    assert_eq!(report.label_source, "composite_rank");
    assert_eq!(report.label_counts, [20, 20, 20]);
    assert_eq!(report.train_rows + report.test_rows, 60);
    assert_eq!(report.test_rows, 12, "four held out per class");
    assert_eq!(report.cv_scores.len(), 5);
    assert!(report.cv_scores.iter().all(|s| (0.0..=1.0).contains(s)));
    assert!((0.0..=1.0).contains(&report.train_accuracy));
    assert!((0.0..=1.0).contains(&report.test_accuracy));
    assert!(!has_event(&report.events, |e| matches!(e, PipelineEvent::DegradedSplit { .. })));
    assert!(has_event(&report.events, |e| matches!(e, PipelineEvent::ModelTrained { .. })));
    assert!(clf.is_trained());
}

/// Five customers cannot be split or cross-validated; training still
/// succeeds on train == test with warnings.
#[test]
fn tiny_batch_degrades_instead_of_failing() {
    let features = scored(population(5));
    let mut clf = classifier();

    let report = clf.train(&features).unwrap();

    assert_eq!(report.train_rows, 5);
    assert_eq!(report.test_rows, 5);
    assert_eq!(report.train_accuracy, report.test_accuracy);
    assert_eq!(report.cv_scores, vec![report.train_accuracy]);
    assert!(has_event(&report.events, |e| matches!(e, PipelineEvent::DegradedSplit { rows: 5, .. })));
    assert!(has_event(&report.events, |e| matches!(e, PipelineEvent::CrossValidationSkipped { .. })));

    let predictions = clf.predict(&features).unwrap();
    assert_eq!(predictions.len(), 5);
}

#[test]
fn small_classes_reduce_the_fold_count() {
    let features = scored(population(24));
    let mut config = PipelineConfig::default_test().classifier;
    config.cv_folds = 10;
    let mut clf = PropensityClassifier::new(config);

    let report = clf.train(&features).unwrap();

    // 8 per class, 2 held out each: 6 per class left for folds.
    assert_eq!(report.cv_scores.len(), 6);
    assert!(has_event(&report.events, |e| matches!(
        e,
        PipelineEvent::CrossValidationReduced { requested: 10, folds: 6 }
    )));
}

#[test]
fn predict_before_train_fails() {
    let features = scored(population(10));
    let err = classifier().predict(&features).unwrap_err();
    assert!(matches!(err, PipelineError::ModelNotTrained));
}

#[test]
fn empty_table_cannot_be_trained() {
    let err = classifier().train(&FeatureTable::default()).unwrap_err();
    assert!(matches!(err, PipelineError::EmptyTrainingSet));
}

#[test]
fn predictions_are_probability_distributions() {
    let features = scored(population(30));
    let mut clf = classifier();
    clf.train(&features).unwrap();

    let predictions = clf.predict(&features).unwrap();

    assert_eq!(predictions.len(), features.len());
    for p in &predictions {
        let total: f64 = p.probabilities.iter().sum();
        assert!((total - 1.0).abs() < 1e-9, "probabilities sum to {total}");
        let best = p.probabilities.iter().copied().fold(f64::MIN, f64::max);
        assert_eq!(p.confidence, best);
        assert_eq!(p.probability(p.predicted_tier), best);
    }
}

#[test]
fn propensity_score_is_not_a_model_input() {
    let features = scored(population(30));
    let mut clf = classifier();
    let report = clf.train(&features).unwrap();

    let columns = &clf.model().unwrap().feature_columns;
    assert!(!columns.contains(&Feature::PropensityScore));
    assert!(columns.contains(&Feature::UrgencyScore));
    assert_eq!(report.feature_importance.len(), columns.len());
}

#[test]
fn feature_importance_is_normalized_and_sorted() {
    let features = scored(population(60));
    let report = classifier().train(&features).unwrap();

    let total: f64 = report.feature_importance.iter().map(|(_, w)| w).sum();
    assert!((total - 1.0).abs() < 1e-9, "importance sums to {total}");
    for pair in report.feature_importance.windows(2) {
        assert!(pair[0].1 >= pair[1].1);
    }
}

/// A table missing a column the model was trained on is rejected.
#[test]
fn schema_mismatch_is_reported() {
    let mut clf = classifier();
    clf.train(&scored(population(30))).unwrap();

    let mut inputs = PipelineInputs::new();
    inputs.insert(
        SourceKind::InstallBase,
        install_base(&[
            ("10001", "A", "Nexus", Some(10)),
            ("10002", "B", "UCS", Some(400)),
            ("10003", "C", "ASR", Some(900)),
        ]),
    );
    let narrow = scored(inputs);

    let err = clf.predict(&narrow).unwrap_err();
    assert!(matches!(err, PipelineError::SchemaMismatch { .. }), "got {err:?}");
}

/// A model restored from its blob predicts what the original predicted.
#[test]
fn model_blob_round_trip_preserves_predictions() {
    let features = scored(population(30));
    let mut clf = classifier();
    clf.train(&features).unwrap();
    let before = clf.predict(&features).unwrap();

    let blob = clf.model().unwrap().to_blob().unwrap();
    let restored = PropensityClassifier::from_model(
        ClassifierConfig::default(),
        TrainedModel::from_blob(&blob).unwrap(),
    );
    let after = restored.predict(&features).unwrap();

    assert_eq!(before.len(), after.len());
    for (a, b) in before.iter().zip(&after) {
        assert_eq!(a.unified_id, b.unified_id);
        assert_eq!(a.predicted_tier, b.predicted_tier);
        for t in Tier::ALL {
            assert!((a.probability(t) - b.probability(t)).abs() < 1e-9);
        }
    }
}

#[test]
fn training_is_reproducible_for_a_seed() {
    let features = scored(population(40));

    let mut a = classifier();
    let mut b = classifier();
    let report_a = a.train(&features).unwrap();
    let report_b = b.train(&features).unwrap();

    assert_eq!(report_a.cv_scores, report_b.cv_scores);
    assert_eq!(report_a.feature_importance, report_b.feature_importance);
    assert_eq!(a.predict(&features).unwrap(), b.predict(&features).unwrap());
}

#[test]
fn label_source_is_pluggable() {
    let features = scored(population(30));
    let mut clf = PropensityClassifier::with_label_source(
        PipelineConfig::default_test().classifier,
        Box::new(ParityLabels),
    );

    let report = clf.train(&features).unwrap();

    assert_eq!(report.label_source, "parity");
    assert_eq!(report.label_counts, [15, 0, 15]);
    let predictions = clf.predict(&features).unwrap();
    assert!(predictions.iter().all(|p| p.predicted_tier != Tier::Medium));
}
