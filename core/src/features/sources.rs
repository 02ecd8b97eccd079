//! Per-source feature spec tables.
//!
//! Column names refer to the normalized tables (see normalizer.rs).
//! Every entry falls back to 0 / false when its group has no data.

use super::{
    aggregator::{Aggregation, DerivedSpec, FeatureSpec, SourceFeatureSpec},
    Feature, FeatureValue,
};
use crate::{config::AggregationConfig, normalizer::safe_ratio, types::SourceKind};

const fn num(feature: Feature, column: Option<&'static str>, aggregation: Aggregation) -> FeatureSpec {
    FeatureSpec { feature, column, aggregation, fallback: FeatureValue::Number(0.0) }
}

const fn flag(feature: Feature, column: Option<&'static str>, aggregation: Aggregation) -> FeatureSpec {
    FeatureSpec { feature, column, aggregation, fallback: FeatureValue::Flag(false) }
}

// ── Derivations ──────────────────────────────────────────────────────────────

/// 4 / 3 / 2 / 1 by the configured day thresholds; no date at all → 0.
pub fn urgency_from_days(days: Option<f64>, config: &AggregationConfig) -> f64 {
    let [critical, high, medium] = config.urgency_days;
    match days {
        None                   => 0.0,
        Some(d) if d < critical => 4.0,
        Some(d) if d < high     => 3.0,
        Some(d) if d < medium   => 2.0,
        Some(_)                => 1.0,
    }
}

fn urgency(inputs: &[Option<f64>], config: &AggregationConfig) -> Option<f64> {
    Some(urgency_from_days(inputs[0], config))
}

fn success_rate(inputs: &[Option<f64>], _: &AggregationConfig) -> Option<f64> {
    Some(safe_ratio(inputs[0], inputs[1]))
}

fn recent_engagement(inputs: &[Option<f64>], config: &AggregationConfig) -> Option<f64> {
    let recent = inputs[0].is_some_and(|d| d < config.recent_engagement_days);
    Some(if recent { 1.0 } else { 0.0 })
}

fn low_utilization(inputs: &[Option<f64>], config: &AggregationConfig) -> Option<f64> {
    let low = inputs[0].is_some_and(|u| u < config.low_utilization_threshold);
    Some(if low { 1.0 } else { 0.0 })
}

fn renewal_urgency(inputs: &[Option<f64>], config: &AggregationConfig) -> Option<f64> {
    let urgent = inputs[0].is_some_and(|d| d < config.renewal_urgency_days);
    Some(if urgent { 1.0 } else { 0.0 })
}

// ── Spec tables ──────────────────────────────────────────────────────────────

pub static INSTALL_BASE: SourceFeatureSpec = SourceFeatureSpec {
    source: SourceKind::InstallBase,
    features: &[
        num(Feature::ProductCount,       None,                   Aggregation::Rows),
        num(Feature::PlatformDiversity,  Some("platform"),       Aggregation::NUnique),
        num(Feature::ActiveSupportCount, Some("active_support"), Aggregation::CountTrue),
        num(Feature::MinDaysToEol,       Some("days_to_eol"),    Aggregation::Min),
        num(Feature::MeanDaysToEol,      Some("days_to_eol"),    Aggregation::Mean),
        num(Feature::MinDaysToEos,       Some("days_to_eos"),    Aggregation::Min),
        num(Feature::MeanDaysToEos,      Some("days_to_eos"),    Aggregation::Mean),
    ],
    derived: &[
        DerivedSpec {
            feature:  Feature::EolUrgencyScore,
            inputs:   &[Feature::MinDaysToEol],
            derive:   urgency,
            fallback: FeatureValue::Number(0.0),
        },
        DerivedSpec {
            feature:  Feature::EosUrgencyScore,
            inputs:   &[Feature::MinDaysToEos],
            derive:   urgency,
            fallback: FeatureValue::Number(0.0),
        },
    ],
    broadcast_when_unkeyed: false,
};

pub static OPPORTUNITIES: SourceFeatureSpec = SourceFeatureSpec {
    source: SourceKind::Opportunities,
    features: &[
        num(Feature::OpportunityCount,          None,                       Aggregation::Rows),
        num(Feature::ProductLineDiversity,      Some("product_line"),       Aggregation::NUnique),
        num(Feature::MeanDescriptionLength,     Some("description_length"), Aggregation::Mean),
        num(Feature::DescribedOpportunityCount, Some("description"),        Aggregation::CountNonEmpty),
        flag(Feature::HasActiveOpportunity,     None,                       Aggregation::AnyRow),
    ],
    derived: &[],
    broadcast_when_unkeyed: false,
};

pub static PROJECTS: SourceFeatureSpec = SourceFeatureSpec {
    source: SourceKind::Projects,
    features: &[
        num(Feature::ProjectCount,           None,                     Aggregation::Rows),
        num(Feature::DatedProjectCount,      Some("days_since_start"), Aggregation::Count),
        num(Feature::PracticeDiversity,      Some("practice"),         Aggregation::NUnique),
        num(Feature::CountryDiversity,       Some("country"),          Aggregation::NUnique),
        num(Feature::SuccessfulProjectCount, Some("success"),          Aggregation::CountTrue),
        num(Feature::DaysSinceLastProject,   Some("days_since_start"), Aggregation::Min),
        num(Feature::ProjectTotalValue,      Some("project_value"),    Aggregation::Sum),
    ],
    derived: &[
        DerivedSpec {
            feature:  Feature::ProjectSuccessRate,
            inputs:   &[Feature::SuccessfulProjectCount, Feature::ProjectCount],
            derive:   success_rate,
            fallback: FeatureValue::Number(0.0),
        },
        DerivedSpec {
            feature:  Feature::RecentEngagement,
            inputs:   &[Feature::DaysSinceLastProject],
            derive:   recent_engagement,
            fallback: FeatureValue::Flag(false),
        },
    ],
    broadcast_when_unkeyed: false,
};

pub static SERVICE_CREDITS: SourceFeatureSpec = SourceFeatureSpec {
    source: SourceKind::ServiceCredits,
    features: &[
        num(Feature::CreditContractCount,     None,                         Aggregation::Rows),
        num(Feature::DatedContractCount,      Some("days_to_contract_end"), Aggregation::Count),
        num(Feature::PurchasedCreditsTotal,   Some("purchased_credits"),    Aggregation::Sum),
        num(Feature::ActiveCreditsTotal,      Some("active_credits"),       Aggregation::Sum),
        num(Feature::DeliveredCreditsTotal,   Some("delivered_credits"),    Aggregation::Sum),
        num(Feature::MeanUtilization,         Some("utilization"),          Aggregation::Mean),
        num(Feature::MeanDeliveryRate,        Some("delivery_rate"),        Aggregation::Mean),
        num(Feature::MinDaysToContractEnd,    Some("days_to_contract_end"), Aggregation::Min),
        num(Feature::CreditPracticeDiversity, Some("practice"),             Aggregation::NUnique),
    ],
    derived: &[
        DerivedSpec {
            feature:  Feature::LowUtilizationRisk,
            inputs:   &[Feature::MeanUtilization],
            derive:   low_utilization,
            fallback: FeatureValue::Flag(false),
        },
        DerivedSpec {
            feature:  Feature::ContractRenewalUrgency,
            inputs:   &[Feature::MinDaysToContractEnd],
            derive:   renewal_urgency,
            fallback: FeatureValue::Flag(false),
        },
    ],
    broadcast_when_unkeyed: true,
};

/// Every source spec, in aggregation order.
pub fn all_specs() -> [&'static SourceFeatureSpec; 4] {
    [&INSTALL_BASE, &OPPORTUNITIES, &PROJECTS, &SERVICE_CREDITS]
}
