//! Per-customer feature rows, the output of the aggregator and scorer.
//!
//! RULES:
//!   - The feature surface is the closed `Feature` enum. No string keys.
//!   - Rows are append-only: a stage may add features, never overwrite
//!     another stage's.
//!   - A feature is either in the table schema for every row or for none,
//!     so after the aggregator's fill pass no cell is missing.

pub mod aggregator;
pub mod sources;

use crate::{
    error::{PipelineError, PipelineResult},
    identity::CustomerRoster,
    types::{IdScheme, SourceKind, Tier, UnifiedId},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Every feature a row can carry. Declaration order is column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    // ── Install base ───────────────────────────────
    ProductCount,
    PlatformDiversity,
    ActiveSupportCount,
    MinDaysToEol,
    MeanDaysToEol,
    MinDaysToEos,
    MeanDaysToEos,
    EolUrgencyScore,
    EosUrgencyScore,

    // ── Opportunities ──────────────────────────────
    OpportunityCount,
    ProductLineDiversity,
    MeanDescriptionLength,
    DescribedOpportunityCount,
    HasActiveOpportunity,

    // ── Projects ───────────────────────────────────
    ProjectCount,
    DatedProjectCount,
    PracticeDiversity,
    CountryDiversity,
    SuccessfulProjectCount,
    ProjectSuccessRate,
    DaysSinceLastProject,
    RecentEngagement,
    ProjectTotalValue,

    // ── Service credits ────────────────────────────
    CreditContractCount,
    DatedContractCount,
    PurchasedCreditsTotal,
    ActiveCreditsTotal,
    DeliveredCreditsTotal,
    MeanUtilization,
    MeanDeliveryRate,
    MinDaysToContractEnd,
    CreditPracticeDiversity,
    LowUtilizationRisk,
    ContractRenewalUrgency,

    // ── Composite scorer ───────────────────────────
    RecencyScore,
    FrequencyScore,
    MonetaryScore,
    RfmScore,
    UrgencyScore,
    PropensityScore,
}

/// Which step owns a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FeatureGroup {
    Source(SourceKind),
    Score,
}

impl Feature {
    pub const ALL: [Feature; 40] = [
        Feature::ProductCount,
        Feature::PlatformDiversity,
        Feature::ActiveSupportCount,
        Feature::MinDaysToEol,
        Feature::MeanDaysToEol,
        Feature::MinDaysToEos,
        Feature::MeanDaysToEos,
        Feature::EolUrgencyScore,
        Feature::EosUrgencyScore,
        Feature::OpportunityCount,
        Feature::ProductLineDiversity,
        Feature::MeanDescriptionLength,
        Feature::DescribedOpportunityCount,
        Feature::HasActiveOpportunity,
        Feature::ProjectCount,
        Feature::DatedProjectCount,
        Feature::PracticeDiversity,
        Feature::CountryDiversity,
        Feature::SuccessfulProjectCount,
        Feature::ProjectSuccessRate,
        Feature::DaysSinceLastProject,
        Feature::RecentEngagement,
        Feature::ProjectTotalValue,
        Feature::CreditContractCount,
        Feature::DatedContractCount,
        Feature::PurchasedCreditsTotal,
        Feature::ActiveCreditsTotal,
        Feature::DeliveredCreditsTotal,
        Feature::MeanUtilization,
        Feature::MeanDeliveryRate,
        Feature::MinDaysToContractEnd,
        Feature::CreditPracticeDiversity,
        Feature::LowUtilizationRisk,
        Feature::ContractRenewalUrgency,
        Feature::RecencyScore,
        Feature::FrequencyScore,
        Feature::MonetaryScore,
        Feature::RfmScore,
        Feature::UrgencyScore,
        Feature::PropensityScore,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::ProductCount              => "product_count",
            Self::PlatformDiversity         => "platform_diversity",
            Self::ActiveSupportCount        => "active_support_count",
            Self::MinDaysToEol              => "min_days_to_eol",
            Self::MeanDaysToEol             => "mean_days_to_eol",
            Self::MinDaysToEos              => "min_days_to_eos",
            Self::MeanDaysToEos             => "mean_days_to_eos",
            Self::EolUrgencyScore           => "eol_urgency_score",
            Self::EosUrgencyScore           => "eos_urgency_score",
            Self::OpportunityCount          => "opportunity_count",
            Self::ProductLineDiversity      => "product_line_diversity",
            Self::MeanDescriptionLength     => "mean_description_length",
            Self::DescribedOpportunityCount => "described_opportunity_count",
            Self::HasActiveOpportunity      => "has_active_opportunity",
            Self::ProjectCount              => "project_count",
            Self::DatedProjectCount         => "dated_project_count",
            Self::PracticeDiversity         => "practice_diversity",
            Self::CountryDiversity          => "country_diversity",
            Self::SuccessfulProjectCount    => "successful_project_count",
            Self::ProjectSuccessRate        => "project_success_rate",
            Self::DaysSinceLastProject      => "days_since_last_project",
            Self::RecentEngagement          => "recent_engagement",
            Self::ProjectTotalValue         => "project_total_value",
            Self::CreditContractCount       => "credit_contract_count",
            Self::DatedContractCount        => "dated_contract_count",
            Self::PurchasedCreditsTotal     => "purchased_credits_total",
            Self::ActiveCreditsTotal        => "active_credits_total",
            Self::DeliveredCreditsTotal     => "delivered_credits_total",
            Self::MeanUtilization           => "mean_utilization",
            Self::MeanDeliveryRate          => "mean_delivery_rate",
            Self::MinDaysToContractEnd      => "min_days_to_contract_end",
            Self::CreditPracticeDiversity   => "credit_practice_diversity",
            Self::LowUtilizationRisk        => "low_utilization_risk",
            Self::ContractRenewalUrgency    => "contract_renewal_urgency",
            Self::RecencyScore              => "recency_score",
            Self::FrequencyScore            => "frequency_score",
            Self::MonetaryScore             => "monetary_score",
            Self::RfmScore                  => "rfm_score",
            Self::UrgencyScore              => "urgency_score",
            Self::PropensityScore           => "propensity_score",
        }
    }

    pub fn group(&self) -> FeatureGroup {
        use Feature::*;
        match self {
            ProductCount | PlatformDiversity | ActiveSupportCount | MinDaysToEol
            | MeanDaysToEol | MinDaysToEos | MeanDaysToEos | EolUrgencyScore
            | EosUrgencyScore => FeatureGroup::Source(SourceKind::InstallBase),

            OpportunityCount | ProductLineDiversity | MeanDescriptionLength
            | DescribedOpportunityCount | HasActiveOpportunity => {
                FeatureGroup::Source(SourceKind::Opportunities)
            }

            ProjectCount | DatedProjectCount | PracticeDiversity | CountryDiversity
            | SuccessfulProjectCount | ProjectSuccessRate | DaysSinceLastProject
            | RecentEngagement | ProjectTotalValue => FeatureGroup::Source(SourceKind::Projects),

            CreditContractCount | DatedContractCount | PurchasedCreditsTotal
            | ActiveCreditsTotal | DeliveredCreditsTotal | MeanUtilization | MeanDeliveryRate
            | MinDaysToContractEnd | CreditPracticeDiversity | LowUtilizationRisk
            | ContractRenewalUrgency => FeatureGroup::Source(SourceKind::ServiceCredits),

            RecencyScore | FrequencyScore | MonetaryScore | RfmScore | UrgencyScore
            | PropensityScore => FeatureGroup::Score,
        }
    }

    /// Boolean features; everything else is numeric.
    pub fn is_flag(&self) -> bool {
        matches!(
            self,
            Self::HasActiveOpportunity
                | Self::RecentEngagement
                | Self::LowUtilizationRisk
                | Self::ContractRenewalUrgency
        )
    }

    /// Whether the classifier may learn from this feature.
    /// The propensity score itself is excluded to keep the bootstrap
    /// labels from leaking straight into the inputs.
    pub fn is_model_input(&self) -> bool {
        !matches!(self, Self::PropensityScore)
    }
}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Flag(bool),
    Number(f64),
}

impl FeatureValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            Self::Flag(b)   => if *b { 1.0 } else { 0.0 },
            Self::Number(n) => *n,
        }
    }

    /// Zero/false default for a feature.
    pub fn zero_for(feature: Feature) -> Self {
        if feature.is_flag() { Self::Flag(false) } else { Self::Number(0.0) }
    }

    /// Coerce a raw number into the feature's kind.
    pub fn for_feature(feature: Feature, value: f64) -> Self {
        if feature.is_flag() { Self::Flag(value != 0.0) } else { Self::Number(value) }
    }
}

// ── Rows ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub unified_id:  UnifiedId,
    pub original_id: String,
    pub id_scheme:   IdScheme,
    values:          BTreeMap<Feature, FeatureValue>,
    tier:            Option<Tier>,
}

impl FeatureRow {
    pub fn new(unified_id: UnifiedId, original_id: String, id_scheme: IdScheme) -> Self {
        Self {
            unified_id,
            original_id,
            id_scheme,
            values: BTreeMap::new(),
            tier:   None,
        }
    }

    /// Add a feature. Fails if the feature is already present.
    pub fn insert(&mut self, feature: Feature, value: FeatureValue) -> PipelineResult<()> {
        if self.values.contains_key(&feature) {
            return Err(PipelineError::FeatureOverwrite {
                unified_id: self.unified_id,
                feature:    feature.name().to_string(),
            });
        }
        self.values.insert(feature, value);
        Ok(())
    }

    pub fn get(&self, feature: Feature) -> Option<FeatureValue> {
        self.values.get(&feature).copied()
    }

    /// Numeric view; absent features read as 0.
    pub fn number(&self, feature: Feature) -> f64 {
        self.get(feature).map(|v| v.as_f64()).unwrap_or(0.0)
    }

    /// Boolean view; absent features read as false.
    pub fn flag(&self, feature: Feature) -> bool {
        self.number(feature) != 0.0
    }

    pub fn values(&self) -> impl Iterator<Item = (Feature, FeatureValue)> + '_ {
        self.values.iter().map(|(f, v)| (*f, *v))
    }

    pub fn tier(&self) -> Option<Tier> {
        self.tier
    }

    pub fn set_tier(&mut self, tier: Tier) -> PipelineResult<()> {
        if self.tier.is_some() {
            return Err(PipelineError::FeatureOverwrite {
                unified_id: self.unified_id,
                feature:    "tier".into(),
            });
        }
        self.tier = Some(tier);
        Ok(())
    }
}

// ── Table ────────────────────────────────────────────────────────────────────

/// One row per canonical customer, ordered by unified_id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable {
    rows:   Vec<FeatureRow>,
    schema: BTreeSet<Feature>,
}

impl FeatureTable {
    /// Seed the table with one empty row per roster customer.
    pub fn from_roster(roster: &CustomerRoster) -> Self {
        Self {
            rows: roster
                .iter()
                .map(|c| FeatureRow::new(c.unified_id, c.original_id.clone(), c.id_scheme))
                .collect(),
            schema: BTreeSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[FeatureRow] {
        &self.rows
    }

    pub fn row(&self, unified_id: UnifiedId) -> Option<&FeatureRow> {
        self.rows.iter().find(|r| r.unified_id == unified_id)
    }

    pub fn has(&self, feature: Feature) -> bool {
        self.schema.contains(&feature)
    }

    /// Features present, in column order.
    pub fn schema(&self) -> impl Iterator<Item = Feature> + '_ {
        self.schema.iter().copied()
    }

    /// Numeric column, row order. `None` when the feature is absent.
    pub fn column(&self, feature: Feature) -> Option<Vec<f64>> {
        self.has(feature)
            .then(|| self.rows.iter().map(|r| r.number(feature)).collect())
    }

    /// Append a full column. One value per row, and the feature must be new.
    pub fn append_column(&mut self, feature: Feature, values: Vec<FeatureValue>) -> PipelineResult<()> {
        if values.len() != self.rows.len() {
            return Err(PipelineError::Other(anyhow::anyhow!(
                "column '{feature}' has {} values for {} rows",
                values.len(),
                self.rows.len()
            )));
        }
        if self.schema.contains(&feature) {
            return Err(PipelineError::FeatureOverwrite {
                unified_id: self.rows.first().map(|r| r.unified_id).unwrap_or_default(),
                feature:    feature.name().to_string(),
            });
        }
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.insert(feature, value)?;
        }
        self.schema.insert(feature);
        Ok(())
    }

    /// Assign tiers in row order. Each row's tier may be set only once.
    pub fn assign_tiers(&mut self, tiers: &[Tier]) -> PipelineResult<()> {
        for (row, tier) in self.rows.iter_mut().zip(tiers) {
            row.set_tier(*tier)?;
        }
        Ok(())
    }

    /// Every row carries every schema feature.
    pub fn is_complete(&self) -> bool {
        self.rows
            .iter()
            .all(|r| self.schema.iter().all(|f| r.get(*f).is_some()))
    }

    pub fn tier_counts(&self) -> BTreeMap<Tier, usize> {
        let mut counts = BTreeMap::new();
        for tier in self.rows.iter().filter_map(|r| r.tier) {
            *counts.entry(tier).or_insert(0) += 1;
        }
        counts
    }
}
