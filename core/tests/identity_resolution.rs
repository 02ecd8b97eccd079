mod common;

use common::{as_of, install_base, opportunities, projects, table};
use propensity_core::{
    config::PipelineConfig,
    error::PipelineError,
    event::PipelineEvent,
    identity::NoCrossLinking,
    pipeline::{PipelineInputs, PipelineOutput, PropensityPipeline},
    stage::{AggregateStage, NormalizeStage, ResolveStage, ScoreStage},
    table::Value,
    types::{IdScheme, SourceKind},
};

// ── Helpers ──────────────────────────────────────────────────────────────────

fn run(inputs: PipelineInputs) -> PipelineOutput {
    PropensityPipeline::build(PipelineConfig::default_test(), as_of())
        .unwrap()
        .run(inputs)
        .unwrap()
}

fn has_event(output: &PipelineOutput, pred: impl Fn(&PipelineEvent) -> bool) -> bool {
    output.events.iter().any(|e| pred(&e.event))
}

/// (original_id, scheme) for every roster entry, in unified_id order.
fn roster_ids(output: &PipelineOutput) -> Vec<(u64, String, IdScheme)> {
    output
        .roster
        .iter()
        .map(|c| (c.unified_id, c.original_id.clone(), c.id_scheme))
        .collect()
}

// ── Tests ────────────────────────────────────────────────────────────────────

/// The same five-digit id in install base and projects is one customer
/// contributed by both sources.
#[test]
fn same_scheme_ids_merge_across_sources() {
    let mut inputs = PipelineInputs::new();
    inputs.insert(
        SourceKind::InstallBase,
        install_base(&[("10001", "Acme", "Nexus", Some(100)), ("10002", "Globex", "UCS", None)]),
    );
    inputs.insert(
        SourceKind::Projects,
        projects(&[("10001", 10, "Completed", 5_000.0, "Security")]),
    );

    let out = run(inputs);

    assert_eq!(out.roster.len(), 2);
    let acme = out.roster.get(1).unwrap();
    assert_eq!(acme.original_id, "10001");
    assert!(acme.contributing_sources.contains(&SourceKind::InstallBase));
    assert!(acme.contributing_sources.contains(&SourceKind::Projects));
    let globex = out.roster.get(2).unwrap();
    assert_eq!(globex.contributing_sources.len(), 1);
}

/// Five-digit and nine-digit identifiers are never merged, even when the
/// digits overlap.
#[test]
fn different_schemes_stay_separate() {
    let mut inputs = PipelineInputs::new();
    inputs.insert(
        SourceKind::InstallBase,
        install_base(&[("12345", "Acme", "Nexus", Some(100))]),
    );
    inputs.insert(
        SourceKind::Opportunities,
        opportunities(&[("000012345", "Acme", "Switching")]),
    );

    let out = run(inputs);

    assert_eq!(out.roster.len(), 2);
    assert_eq!(out.roster.count_scheme(IdScheme::FiveDigit), 1);
    assert_eq!(out.roster.count_scheme(IdScheme::NineDigit), 1);
    assert!(out.cross_links.candidates.iter().all(|c| c.five_digit != c.nine_digit));
}

/// Spreadsheet float artifacts ("10001.0", 10001.0) resolve to the same
/// customer as the plain text id.
#[test]
fn float_artifacts_are_canonicalized() {
    let mut inputs = PipelineInputs::new();
    inputs.insert(
        SourceKind::InstallBase,
        table(
            &["Customer ID", "Platform", "EOL Date"],
            vec![
                vec![Value::Number(10001.0), "Nexus".into(), Value::Missing],
                vec!["10001".into(), "UCS".into(), Value::Missing],
            ],
        ),
    );
    inputs.insert(
        SourceKind::Projects,
        projects(&[("10001.0", 10, "Completed", 1_000.0, "Security")]),
    );

    let out = run(inputs);

    assert_eq!(out.roster.len(), 1, "roster: {:?}", roster_ids(&out));
    let c = out.roster.get(1).unwrap();
    assert_eq!(c.original_id, "10001");
    assert_eq!(c.contributing_sources.len(), 2);
}

/// Unified ids start at 1, follow numeric id order and do not depend on the
/// order rows arrive in.
#[test]
fn unified_ids_are_sequential_and_order_independent() {
    let forward = [
        ("10010", "C", "Nexus", None),
        ("10002", "B", "Nexus", None),
        ("10001", "A", "Nexus", None),
    ];
    let mut reversed = forward;
    reversed.reverse();

    let mut a = PipelineInputs::new();
    a.insert(SourceKind::InstallBase, install_base(&forward));
    let mut b = PipelineInputs::new();
    b.insert(SourceKind::InstallBase, install_base(&reversed));

    let out_a = run(a);
    let out_b = run(b);

    let expected = vec![
        (1, "10001".to_string(), IdScheme::FiveDigit),
        (2, "10002".to_string(), IdScheme::FiveDigit),
        (3, "10010".to_string(), IdScheme::FiveDigit),
    ];
    assert_eq!(roster_ids(&out_a), expected);
    assert_eq!(roster_ids(&out_b), expected);
}

/// Five-digit customers are numbered before nine-digit ones.
#[test]
fn five_digit_customers_come_first() {
    let mut inputs = PipelineInputs::new();
    inputs.insert(
        SourceKind::InstallBase,
        install_base(&[("20000", "A", "Nexus", None)]),
    );
    inputs.insert(
        SourceKind::Opportunities,
        opportunities(&[("100000001", "B", "Switching"), ("100000000", "C", "Wireless")]),
    );

    let ids = roster_ids(&run(inputs));

    assert_eq!(ids[0], (1, "20000".to_string(), IdScheme::FiveDigit));
    assert_eq!(ids[1], (2, "100000000".to_string(), IdScheme::NineDigit));
    assert_eq!(ids[2], (3, "100000001".to_string(), IdScheme::NineDigit));
}

/// Rows with a blank identifier are dropped and counted, not fatal.
#[test]
fn blank_identifiers_are_unattributable() {
    let mut inputs = PipelineInputs::new();
    inputs.insert(
        SourceKind::InstallBase,
        install_base(&[("10001", "A", "Nexus", None), ("  ", "B", "UCS", None)]),
    );

    let out = run(inputs);

    assert_eq!(out.roster.len(), 1);
    assert!(has_event(&out, |e| matches!(
        e,
        PipelineEvent::UnattributableRows { source: SourceKind::InstallBase, count: 1 }
    )));
}

/// An id whose digit count disagrees with the source's scheme keeps the
/// declared scheme and raises a warning.
#[test]
fn scheme_mismatch_is_reported_not_reassigned() {
    let mut inputs = PipelineInputs::new();
    inputs.insert(
        SourceKind::InstallBase,
        install_base(&[("123", "Tiny", "Nexus", None)]),
    );

    let out = run(inputs);

    assert_eq!(out.roster.count_scheme(IdScheme::FiveDigit), 1);
    assert!(has_event(&out, |e| matches!(
        e,
        PipelineEvent::SchemeMismatch { original_id, scheme: IdScheme::FiveDigit, .. } if original_id == "123"
    )));
}

/// Name matching proposes a cross-scheme candidate but never merges, and
/// customers without a candidate are flagged unlinked.
#[test]
fn name_matches_are_candidates_only() {
    let mut inputs = PipelineInputs::new();
    inputs.insert(
        SourceKind::InstallBase,
        install_base(&[("10001", "Acme Corp", "Nexus", None), ("10002", "Initech", "UCS", None)]),
    );
    inputs.insert(
        SourceKind::Opportunities,
        opportunities(&[("100000001", "ACME Corporation", "Switching")]),
    );

    let out = run(inputs);

    assert_eq!(out.roster.len(), 3, "cross-scheme candidates must not merge customers");
    assert_eq!(out.cross_links.candidates.len(), 1);
    let link = &out.cross_links.candidates[0];
    assert_eq!(out.roster.get(link.five_digit).unwrap().original_id, "10001");
    assert_eq!(out.roster.get(link.nine_digit).unwrap().original_id, "100000001");
    assert!(link.score > 0.99);

    assert_eq!(out.cross_links.unlinked, vec![2]);
    assert!(has_event(&out, |e| matches!(
        e,
        PipelineEvent::CrossLinkUnresolved { unlinked: 1, candidates: 1 }
    )));
}

/// With linking switched off every customer is reported unlinked.
#[test]
fn cross_linking_can_be_disabled() {
    let mut pipeline = PropensityPipeline::new(PipelineConfig::default_test(), as_of()).unwrap();
    pipeline.register(Box::new(NormalizeStage));
    pipeline.register(Box::new(ResolveStage::new(Box::new(NoCrossLinking))));
    pipeline.register(Box::new(AggregateStage));
    pipeline.register(Box::new(ScoreStage));

    let mut inputs = PipelineInputs::new();
    inputs.insert(
        SourceKind::InstallBase,
        install_base(&[("10001", "Acme Corp", "Nexus", None)]),
    );
    inputs.insert(
        SourceKind::Opportunities,
        opportunities(&[("100000001", "ACME Corporation", "Switching")]),
    );
    let out = pipeline.run(inputs).unwrap();

    assert!(out.cross_links.candidates.is_empty());
    assert_eq!(out.cross_links.unlinked, vec![1, 2]);
    assert_eq!(out.features.len(), 2);
}

/// A required source that is absent aborts the run before any stage.
#[test]
fn missing_install_base_is_fatal() {
    let mut inputs = PipelineInputs::new();
    inputs.insert(
        SourceKind::Projects,
        projects(&[("10001", 10, "Completed", 1_000.0, "Security")]),
    );

    let err = PropensityPipeline::build(PipelineConfig::default_test(), as_of())
        .unwrap()
        .run(inputs)
        .err()
        .expect("run without install base must fail");

    assert!(matches!(
        err,
        PipelineError::MissingSource { source_kind: SourceKind::InstallBase }
    ));
}

/// Optional sources that are absent only produce warnings.
#[test]
fn absent_optional_sources_are_warnings() {
    let mut inputs = PipelineInputs::new();
    inputs.insert(
        SourceKind::InstallBase,
        install_base(&[("10001", "A", "Nexus", None)]),
    );

    let out = run(inputs);

    for kind in [SourceKind::Opportunities, SourceKind::Projects, SourceKind::ServiceCredits] {
        assert!(
            has_event(&out, |e| matches!(e, PipelineEvent::SourceAbsent { source } if *source == kind)),
            "expected SourceAbsent for {kind}"
        );
    }
    assert!(out.warnings().count() >= 3);
}
