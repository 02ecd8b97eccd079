//! Two pipelines, same run id, same inputs.
//! They must produce identical event logs, feature tables and predictions.
//! Any divergence is a blocker.

mod common;

use common::{as_of, init_logging, install_base, opportunities, population};
use propensity_core::{
    classifier::PropensityClassifier,
    config::PipelineConfig,
    pipeline::{PipelineInputs, PipelineOutput, PropensityPipeline},
    store::{ResultStore, RunRecord},
    types::SourceKind,
};

fn run(run_id: &str, inputs: PipelineInputs) -> PipelineOutput {
    init_logging();
    PropensityPipeline::build(PipelineConfig::default_test(), as_of())
        .expect("pipeline")
        .with_run_id(run_id)
        .run(inputs)
        .expect("run")
}

fn payloads(output: &PipelineOutput) -> Vec<String> {
    output
        .events
        .iter()
        .map(|e| e.to_log_entry(&output.run_id).expect("serialize").payload)
        .collect()
}

fn mixed_inputs() -> PipelineInputs {
    let mut inputs = population(36);
    inputs.insert(
        SourceKind::Opportunities,
        opportunities(&[
            ("100000007", "Customer Holdings", "Switching"),
            ("100000003", "Other Co", "Wireless"),
            ("100000007", "Customer Holdings", "Security"),
        ]),
    );
    inputs
}

#[test]
fn same_inputs_produce_identical_event_logs() {
    let a = run("det-test", mixed_inputs());
    let b = run("det-test", mixed_inputs());

    let log_a = payloads(&a);
    let log_b = payloads(&b);
    assert!(!log_a.is_empty());
    assert_eq!(log_a.len(), log_b.len(), "event log lengths diverged");
    for (i, (x, y)) in log_a.iter().zip(&log_b).enumerate() {
        assert_eq!(x, y, "event logs diverged at seq {i}");
    }
}

#[test]
fn same_inputs_produce_identical_features_and_predictions() {
    let a = run("det-test", mixed_inputs());
    let b = run("det-test", mixed_inputs());

    assert_eq!(a.features, b.features);
    assert_eq!(a.cross_links.candidates, b.cross_links.candidates);

    let mut clf_a = PropensityClassifier::new(PipelineConfig::default_test().classifier);
    let mut clf_b = PropensityClassifier::new(PipelineConfig::default_test().classifier);
    clf_a.train(&a.features).expect("train a");
    clf_b.train(&b.features).expect("train b");

    assert_eq!(
        clf_a.predict(&a.features).expect("predict a"),
        clf_b.predict(&b.features).expect("predict b")
    );
    assert_eq!(
        clf_a.model().expect("model a").to_blob().expect("blob a"),
        clf_b.model().expect("model b").to_blob().expect("blob b")
    );
}

/// Row order inside a source does not change any customer's features.
#[test]
fn row_order_does_not_matter() {
    let rows = [
        ("10003", "C", "Nexus", Some(20)),
        ("10001", "A", "UCS", Some(400)),
        ("10002", "B", "ASR", Some(900)),
        ("10001", "A", "Nexus", Some(60)),
    ];
    let mut reversed = rows;
    reversed.reverse();

    let mut forward_inputs = PipelineInputs::new();
    forward_inputs.insert(SourceKind::InstallBase, install_base(&rows));
    let mut reversed_inputs = PipelineInputs::new();
    reversed_inputs.insert(SourceKind::InstallBase, install_base(&reversed));

    let a = run("order", forward_inputs);
    let b = run("order", reversed_inputs);

    assert_eq!(a.features, b.features);
}

/// The persisted event log reads back in sequence order and matches the
/// in-memory one.
#[test]
fn persisted_event_log_matches_run() {
    let output = run("det-store", mixed_inputs());

    let store = ResultStore::in_memory().expect("in-memory store");
    store.migrate().expect("migration");
    store
        .insert_run(&RunRecord {
            run_id:      output.run_id.clone(),
            as_of:       output.as_of.to_string(),
            version:     "0.1.0-test".into(),
            config_json: "{}".into(),
            started_at:  "2024-06-30T00:00:00Z".into(),
        })
        .expect("insert run");
    for event in &output.events {
        store
            .append_event(&event.to_log_entry(&output.run_id).expect("serialize"))
            .expect("append");
    }

    let stored: Vec<String> = store
        .events_for_run("det-store")
        .expect("read events")
        .into_iter()
        .map(|e| e.payload)
        .collect();
    assert_eq!(stored, payloads(&output));
}
