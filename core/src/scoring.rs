//! Rule-based composite scoring: RFM, urgency, propensity score and tier.
//!
//! Every percentile and min-max bound here is computed over the current
//! batch. Adding or removing customers moves everyone's scores; tiers are
//! only comparable within one run.
//!
//! STEPS (fixed order, each appends one column):
//!   1. recency_score     sum of 3/2/1 day tiers over recency columns
//!   2. frequency_score   sum of 3/2/1 percentile tiers over count columns
//!   3. monetary_score    same method over value columns
//!   4. rfm_score         weighted or plain sum of 1–3
//!   5. urgency_score     EOL/EOS urgency + renewal/low-utilization flags
//!   6. propensity_score  weighted sum of min-max-normalized components
//!   7. tier              batch terciles of the propensity score

use crate::{
    config::{RfmWeighting, ScoringConfig},
    error::PipelineResult,
    event::PipelineEvent,
    features::{Feature, FeatureTable, FeatureValue},
    types::Tier,
};

/// (days feature, count feature that says whether any dated row existed).
const RECENCY_INPUTS: [(Feature, Feature); 2] = [
    (Feature::DaysSinceLastProject, Feature::DatedProjectCount),
    (Feature::MinDaysToContractEnd, Feature::DatedContractCount),
];

const FREQUENCY_INPUTS: [Feature; 3] = [
    Feature::ProjectCount,
    Feature::OpportunityCount,
    Feature::CreditContractCount,
];

const MONETARY_INPUTS: [Feature; 2] = [Feature::ProjectTotalValue, Feature::PurchasedCreditsTotal];

const URGENCY_INPUTS: [Feature; 4] = [
    Feature::EolUrgencyScore,
    Feature::EosUrgencyScore,
    Feature::ContractRenewalUrgency,
    Feature::LowUtilizationRisk,
];

// ── Batch statistics ─────────────────────────────────────────────────────────

/// Linear-interpolated quantile, `q` in [0, 1]. `None` on an empty slice.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64))
}

/// Min-max scale to [0, 1]. A constant column scales to all zeros.
pub fn min_max(values: &[f64]) -> Vec<f64> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    if !(range > 0.0) {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| (v - min) / range).collect()
}

/// 3 / 2 / 1 by the column's own 75th / 50th percentile. Zero scores 1.
fn percentile_tiers(values: &[f64]) -> Vec<f64> {
    let p75 = quantile(values, 0.75).unwrap_or(0.0);
    let p50 = quantile(values, 0.50).unwrap_or(0.0);
    values
        .iter()
        .map(|&v| {
            if v <= 0.0 {
                1.0
            } else if v >= p75 {
                3.0
            } else if v >= p50 {
                2.0
            } else {
                1.0
            }
        })
        .collect()
}

fn add_into(total: &mut [f64], part: &[f64]) {
    for (t, p) in total.iter_mut().zip(part) {
        *t += p;
    }
}

// ── Scorer ───────────────────────────────────────────────────────────────────

pub struct CompositeScorer<'a> {
    config: &'a ScoringConfig,
}

impl<'a> CompositeScorer<'a> {
    pub fn new(config: &'a ScoringConfig) -> Self {
        Self { config }
    }

    /// Append the score columns and assign a tier to every row.
    pub fn score(&self, features: &mut FeatureTable) -> PipelineResult<Vec<PipelineEvent>> {
        let recency = self.recency(features);
        let frequency = Self::percentile_sum(features, &FREQUENCY_INPUTS);
        let monetary = Self::percentile_sum(features, &MONETARY_INPUTS);
        let rfm = self.rfm(&recency, &frequency, &monetary);
        let urgency = self.urgency(features);

        append(features, Feature::RecencyScore, &recency)?;
        append(features, Feature::FrequencyScore, &frequency)?;
        append(features, Feature::MonetaryScore, &monetary)?;
        append(features, Feature::RfmScore, &rfm)?;
        append(features, Feature::UrgencyScore, &urgency)?;

        let propensity = self.propensity(features);
        append(features, Feature::PropensityScore, &propensity)?;

        let (tiers, fallback) = self.tiers(&propensity);
        features.assign_tiers(&tiers)?;

        let mut events = Vec::new();
        if let Some(reason) = fallback {
            events.push(PipelineEvent::TierFallback {
                tier: self.config.fallback_tier.name().to_string(),
                reason,
            });
        }
        log::debug!("score: {} rows, tiers {:?}", features.len(), features.tier_counts());
        Ok(events)
    }

    fn recency(&self, features: &FeatureTable) -> Vec<f64> {
        let [near, mid] = self.config.recency_days;
        let sentinel = self.config.missing_days_sentinel;
        let mut total = vec![0.0; features.len()];

        for (days_feature, count_feature) in RECENCY_INPUTS {
            if !features.has(days_feature) {
                continue;
            }
            let has_count = features.has(count_feature);
            let part: Vec<f64> = features
                .rows()
                .iter()
                .map(|row| {
                    let days = if has_count && row.number(count_feature) == 0.0 {
                        sentinel
                    } else {
                        row.number(days_feature)
                    };
                    if days < near {
                        3.0
                    } else if days < mid {
                        2.0
                    } else {
                        1.0
                    }
                })
                .collect();
            add_into(&mut total, &part);
        }
        total
    }

    fn percentile_sum(features: &FeatureTable, inputs: &[Feature]) -> Vec<f64> {
        let mut total = vec![0.0; features.len()];
        for &feature in inputs {
            if let Some(column) = features.column(feature) {
                add_into(&mut total, &percentile_tiers(&column));
            }
        }
        total
    }

    fn rfm(&self, recency: &[f64], frequency: &[f64], monetary: &[f64]) -> Vec<f64> {
        let (wr, wf, wm) = match self.config.rfm {
            RfmWeighting::Unweighted => (1.0, 1.0, 1.0),
            RfmWeighting::Weighted { recency, frequency, monetary } => (recency, frequency, monetary),
        };
        recency
            .iter()
            .zip(frequency)
            .zip(monetary)
            .map(|((r, f), m)| wr * r + wf * f + wm * m)
            .collect()
    }

    fn urgency(&self, features: &FeatureTable) -> Vec<f64> {
        let mut total = vec![0.0; features.len()];
        for feature in URGENCY_INPUTS {
            if let Some(column) = features.column(feature) {
                add_into(&mut total, &column);
            }
        }
        if self.config.normalize_urgency {
            let max = total.iter().copied().fold(0.0, f64::max);
            if max > 0.0 {
                let scale = self.config.urgency_scale / max;
                total.iter_mut().for_each(|u| *u *= scale);
            }
        }
        total
    }

    fn propensity(&self, features: &FeatureTable) -> Vec<f64> {
        let w = &self.config.weights;
        let components = [
            (Feature::UrgencyScore,         w.urgency),
            (Feature::RfmScore,             w.rfm),
            (Feature::ProjectSuccessRate,   w.success_rate),
            (Feature::PlatformDiversity,    w.platform_diversity),
            (Feature::PracticeDiversity,    w.practice_diversity),
            (Feature::HasActiveOpportunity, w.has_opportunity),
        ];

        let mut total = vec![0.0; features.len()];
        for (feature, weight) in components {
            // Absent columns add nothing; the other weights are not rescaled.
            let Some(column) = features.column(feature) else {
                continue;
            };
            let scaled: Vec<f64> = min_max(&column).into_iter().map(|v| v * weight).collect();
            add_into(&mut total, &scaled);
        }
        total.into_iter().map(|s| s.clamp(0.0, 1.0)).collect()
    }

    /// Tercile tiers. Returns the fallback reason when boundaries collapse.
    fn tiers(&self, scores: &[f64]) -> (Vec<Tier>, Option<String>) {
        let fallback = |reason: String| {
            (vec![self.config.fallback_tier; scores.len()], Some(reason))
        };
        if scores.is_empty() {
            return (Vec::new(), None);
        }
        if scores.len() < 3 {
            return fallback(format!("only {} rows; terciles need at least 3", scores.len()));
        }
        let (Some(q1), Some(q2)) = (quantile(scores, 1.0 / 3.0), quantile(scores, 2.0 / 3.0)) else {
            return fallback("no scores".into());
        };
        if q1 >= q2 {
            return fallback(format!("tercile boundaries collapsed at {q1:.6}"));
        }
        let tiers = scores
            .iter()
            .map(|&s| {
                if s <= q1 {
                    Tier::Low
                } else if s <= q2 {
                    Tier::Medium
                } else {
                    Tier::High
                }
            })
            .collect();
        (tiers, None)
    }
}

fn append(features: &mut FeatureTable, feature: Feature, values: &[f64]) -> PipelineResult<()> {
    features.append_column(feature, values.iter().map(|&v| FeatureValue::Number(v)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantile_interpolates_linearly() {
        let v = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile(&v, 0.0), Some(1.0));
        assert_eq!(quantile(&v, 1.0), Some(4.0));
        assert!((quantile(&v, 0.5).unwrap() - 2.5).abs() < 1e-12);
        assert_eq!(quantile(&[], 0.5), None);
    }

    #[test]
    fn constant_column_scales_to_zero() {
        assert_eq!(min_max(&[5.0, 5.0, 5.0]), vec![0.0, 0.0, 0.0]);
        assert_eq!(min_max(&[0.0, 5.0, 10.0]), vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn zero_counts_score_one() {
        let tiers = percentile_tiers(&[0.0, 0.0, 0.0, 4.0]);
        assert_eq!(tiers, vec![1.0, 1.0, 1.0, 3.0]);
    }

    #[test]
    fn collapsed_terciles_fall_back() {
        let config = ScoringConfig::default();
        let scorer = CompositeScorer::new(&config);
        let (tiers, reason) = scorer.tiers(&[0.2; 6]);
        assert!(reason.is_some());
        assert!(tiers.iter().all(|t| *t == Tier::Medium));
    }
}
