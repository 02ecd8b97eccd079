//! Pipeline event log: every stage-level diagnostic.
//!
//! RULE: Recoverable problems (absent columns, unparseable cells,
//! degenerate statistics) never abort a run. They are recorded here as
//! warning events and the stage continues with its documented fallback.

use crate::types::{IdScheme, RunId, SourceKind};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Every event emitted during a run.
/// Variants are only appended, never removed or reordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    // ── Engine events ──────────────────────────────
    RunInitialized {
        run_id: RunId,
        as_of:  NaiveDate,
    },
    StageStarted {
        stage: String,
    },
    StageCompleted {
        stage: String,
    },

    // ── Source normalizer ──────────────────────────
    SourceNormalized {
        source: SourceKind,
        rows:   usize,
    },
    SourceAbsent {
        source: SourceKind,
    },
    UnparseableCells {
        source: SourceKind,
        column: String,
        count:  usize,
    },

    // ── Identity resolver ──────────────────────────
    UnattributableRows {
        source: SourceKind,
        count:  usize,
    },
    SchemeMismatch {
        source:      SourceKind,
        original_id: String,
        scheme:      IdScheme,
    },
    RosterResolved {
        customers:  usize,
        five_digit: usize,
        nine_digit: usize,
        unresolved: usize,
    },
    CrossLinkUnresolved {
        unlinked:   usize,
        candidates: usize,
    },

    // ── Feature aggregator ─────────────────────────
    FeatureGroupSkipped {
        source: SourceKind,
        reason: String,
    },
    FeatureSkipped {
        source:  SourceKind,
        feature: String,
        column:  String,
    },
    BroadcastApplied {
        source:   SourceKind,
        features: usize,
    },

    // ── Composite scorer ───────────────────────────
    TierFallback {
        tier:   String,
        reason: String,
    },

    // ── Propensity classifier ──────────────────────
    DegradedSplit {
        rows:           usize,
        smallest_class: usize,
    },
    CrossValidationReduced {
        requested: usize,
        folds:     usize,
    },
    CrossValidationSkipped {
        smallest_class: usize,
    },
    ModelTrained {
        train_accuracy: f64,
        test_accuracy:  f64,
        features:       usize,
    },
}

impl PipelineEvent {
    /// Stable name for the event_type column in event_log.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RunInitialized { .. }         => "run_initialized",
            Self::StageStarted { .. }           => "stage_started",
            Self::StageCompleted { .. }         => "stage_completed",
            Self::SourceNormalized { .. }       => "source_normalized",
            Self::SourceAbsent { .. }           => "source_absent",
            Self::UnparseableCells { .. }       => "unparseable_cells",
            Self::UnattributableRows { .. }     => "unattributable_rows",
            Self::SchemeMismatch { .. }         => "scheme_mismatch",
            Self::RosterResolved { .. }         => "roster_resolved",
            Self::CrossLinkUnresolved { .. }    => "cross_link_unresolved",
            Self::FeatureGroupSkipped { .. }    => "feature_group_skipped",
            Self::FeatureSkipped { .. }         => "feature_skipped",
            Self::BroadcastApplied { .. }       => "broadcast_applied",
            Self::TierFallback { .. }           => "tier_fallback",
            Self::DegradedSplit { .. }          => "degraded_split",
            Self::CrossValidationReduced { .. } => "cross_validation_reduced",
            Self::CrossValidationSkipped { .. } => "cross_validation_skipped",
            Self::ModelTrained { .. }           => "model_trained",
        }
    }

    /// Warning-level diagnostics: a fallback was taken.
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            Self::SourceAbsent { .. }
                | Self::UnparseableCells { .. }
                | Self::UnattributableRows { .. }
                | Self::SchemeMismatch { .. }
                | Self::CrossLinkUnresolved { .. }
                | Self::FeatureGroupSkipped { .. }
                | Self::BroadcastApplied { .. }
                | Self::TierFallback { .. }
                | Self::DegradedSplit { .. }
                | Self::CrossValidationReduced { .. }
                | Self::CrossValidationSkipped { .. }
        )
    }

    /// Emit through the `log` facade at the matching level.
    pub fn log(&self, stage: &str) {
        if self.is_warning() {
            log::warn!("{stage}: {self:?}");
        } else {
            log::debug!("{stage}: {self:?}");
        }
    }
}

/// A persisted event-log row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id:         Option<i64>,
    pub run_id:     RunId,
    pub seq:        u64,
    pub stage:      String,
    pub event_type: String,
    pub payload:    String,
}
