use crate::{
    error::{PipelineError, PipelineResult},
    types::{IdScheme, SourceKind, Tier},
};
use serde::{Deserialize, Serialize};

// ── Source bindings ────────────────────────────────────────────────

/// Which column carries the customer identifier in a source, and which
/// identifier scheme the producing system assigns. This is external
/// knowledge; it is never inferred from values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceBinding {
    pub source:    SourceKind,
    pub id_column: String,
    pub scheme:    IdScheme,
    /// Optional free-text customer name, used only by cross-scheme matching.
    #[serde(default)]
    pub name_column: Option<String>,
    /// Absent required sources abort the run.
    #[serde(default)]
    pub required: bool,
}

// ── Source normalizer ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// days_to_deadline below this is Critical.
    pub critical_days: i64,
    pub high_days:     i64,
    pub medium_days:   i64,
    /// delivery_rate below this buckets as Low utilization.
    pub utilization_low:  f64,
    /// delivery_rate below this (and ≥ low) buckets as Medium.
    pub utilization_high: f64,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            critical_days:    180,
            high_days:        365,
            medium_days:      730,
            utilization_low:  0.5,
            utilization_high: 0.8,
        }
    }
}

// ── Feature aggregator ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Day thresholds for urgency scores 4 / 3 / 2; anything later scores 1.
    pub urgency_days: [f64; 3],
    /// Projects started within this many days count as recent engagement.
    pub recent_engagement_days: f64,
    /// Mean utilization below this raises low_utilization_risk.
    pub low_utilization_threshold: f64,
    /// Contracts ending within this many days raise contract_renewal_urgency.
    pub renewal_urgency_days: f64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            urgency_days:              [180.0, 365.0, 730.0],
            recent_engagement_days:    90.0,
            low_utilization_threshold: 0.5,
            renewal_urgency_days:      90.0,
        }
    }
}

// ── Composite scorer ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RfmWeighting {
    Unweighted,
    Weighted { recency: f64, frequency: f64, monetary: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PropensityWeights {
    pub urgency:            f64,
    pub rfm:                f64,
    pub success_rate:       f64,
    pub platform_diversity: f64,
    pub practice_diversity: f64,
    pub has_opportunity:    f64,
}

impl PropensityWeights {
    pub fn as_pairs(&self) -> [(&'static str, f64); 6] {
        [
            ("urgency",            self.urgency),
            ("rfm",                self.rfm),
            ("success_rate",       self.success_rate),
            ("platform_diversity", self.platform_diversity),
            ("practice_diversity", self.practice_diversity),
            ("has_opportunity",    self.has_opportunity),
        ]
    }
}

impl Default for PropensityWeights {
    fn default() -> Self {
        Self {
            urgency:            0.30,
            rfm:                0.25,
            success_rate:       0.20,
            platform_diversity: 0.10,
            practice_diversity: 0.10,
            has_opportunity:    0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Recency tiers: below the first → 3, below the second → 2, else 1.
    pub recency_days: [f64; 2],
    /// Stand-in day count for customers with no recency-bearing rows.
    pub missing_days_sentinel: f64,
    pub rfm: RfmWeighting,
    /// Rescale urgency to 0..=urgency_scale by the batch maximum.
    pub normalize_urgency: bool,
    pub urgency_scale: f64,
    pub weights: PropensityWeights,
    /// Tier given to every row when tercile boundaries collapse.
    pub fallback_tier: Tier,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            recency_days:          [30.0, 90.0],
            missing_days_sentinel: 999.0,
            rfm: RfmWeighting::Weighted { recency: 0.3, frequency: 0.4, monetary: 0.3 },
            normalize_urgency:     true,
            urgency_scale:         10.0,
            weights:               PropensityWeights::default(),
            fallback_tier:         Tier::Medium,
        }
    }
}

// ── Propensity classifier ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub seed:             u64,
    pub n_estimators:     usize,
    pub learning_rate:    f64,
    pub max_depth:        usize,
    pub min_samples_leaf: usize,
    /// Fraction of training rows drawn for each boosting round.
    pub subsample:        f64,
    pub test_fraction:    f64,
    /// Below this many rows the split is skipped and train == test.
    pub min_split_rows:   usize,
    /// Every class needs at least this many rows for a stratified split.
    pub min_class_rows:   usize,
    pub cv_folds:         usize,
    pub label_weights:    LabelWeights,
}

/// Weights of the secondary composite used to bootstrap training labels.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelWeights {
    pub urgency:      f64,
    pub rfm:          f64,
    pub success_rate: f64,
}

impl Default for LabelWeights {
    fn default() -> Self {
        Self { urgency: 0.4, rfm: 0.3, success_rate: 0.3 }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            seed:             42,
            n_estimators:     100,
            learning_rate:    0.1,
            max_depth:        3,
            min_samples_leaf: 1,
            subsample:        1.0,
            test_fraction:    0.2,
            min_split_rows:   20,
            min_class_rows:   2,
            cv_folds:         5,
            label_weights:    LabelWeights::default(),
        }
    }
}

// ── Identity resolution ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Minimum name-token Jaccard similarity for a cross-scheme candidate.
    pub name_match_threshold: f64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self { name_match_threshold: 0.8 }
    }
}

// ── Downstream ranking ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    pub top_n:          usize,
    pub min_confidence: f64,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self { top_n: 10, min_confidence: 0.6 }
    }
}

// ── Top level ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub sources:     Vec<SourceBinding>,
    pub normalizer:  NormalizerConfig,
    pub aggregation: AggregationConfig,
    pub scoring:     ScoringConfig,
    pub classifier:  ClassifierConfig,
    pub identity:    IdentityConfig,
    pub ranking:     RankingConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sources: vec![
                SourceBinding {
                    source:      SourceKind::InstallBase,
                    id_column:   "customer_id".into(),
                    scheme:      IdScheme::FiveDigit,
                    name_column: Some("customer_name".into()),
                    required:    true,
                },
                SourceBinding {
                    source:      SourceKind::Opportunities,
                    id_column:   "account_id".into(),
                    scheme:      IdScheme::NineDigit,
                    name_column: Some("account_name".into()),
                    required:    false,
                },
                SourceBinding {
                    source:      SourceKind::Projects,
                    id_column:   "customer_id".into(),
                    scheme:      IdScheme::FiveDigit,
                    name_column: Some("customer_name".into()),
                    required:    false,
                },
                SourceBinding {
                    source:      SourceKind::ServiceCredits,
                    id_column:   "customer_id".into(),
                    scheme:      IdScheme::FiveDigit,
                    name_column: None,
                    required:    false,
                },
            ],
            normalizer:  NormalizerConfig::default(),
            aggregation: AggregationConfig::default(),
            scoring:     ScoringConfig::default(),
            classifier:  ClassifierConfig::default(),
            identity:    IdentityConfig::default(),
            ranking:     RankingConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load overrides from a JSON file. Sections and fields left out of
    /// the file keep their defaults.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: PipelineConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Config with a small ensemble for use in tests.
    pub fn default_test() -> Self {
        let mut config = Self::default();
        config.classifier.n_estimators = 30;
        config
    }

    pub fn binding(&self, source: SourceKind) -> Option<&SourceBinding> {
        self.sources.iter().find(|b| b.source == source)
    }

    pub fn validate(&self) -> PipelineResult<()> {
        let weights = self.scoring.weights.as_pairs();
        if let Some((name, w)) = weights.iter().find(|(_, w)| *w < 0.0 || !w.is_finite()) {
            return Err(PipelineError::InvalidConfig(format!(
                "propensity weight '{name}' must be a non-negative number, got {w}"
            )));
        }
        let total: f64 = weights.iter().map(|(_, w)| w).sum();
        if total > 1.0 + 1e-9 {
            return Err(PipelineError::InvalidConfig(format!(
                "propensity weights sum to {total:.3}; they must not exceed 1.0"
            )));
        }

        let [a, b, c] = self.aggregation.urgency_days;
        if !(a <= b && b <= c) {
            return Err(PipelineError::InvalidConfig(
                "aggregation.urgency_days must be ascending".into(),
            ));
        }
        let n = &self.normalizer;
        if !(n.critical_days <= n.high_days && n.high_days <= n.medium_days) {
            return Err(PipelineError::InvalidConfig(
                "normalizer day thresholds must be ascending".into(),
            ));
        }
        if n.utilization_low > n.utilization_high {
            return Err(PipelineError::InvalidConfig(
                "normalizer.utilization_low must not exceed utilization_high".into(),
            ));
        }
        if self.scoring.recency_days[0] > self.scoring.recency_days[1] {
            return Err(PipelineError::InvalidConfig(
                "scoring.recency_days must be ascending".into(),
            ));
        }

        let cls = &self.classifier;
        if cls.n_estimators == 0 || cls.max_depth == 0 || cls.min_samples_leaf == 0 {
            return Err(PipelineError::InvalidConfig(
                "classifier n_estimators, max_depth and min_samples_leaf must be positive".into(),
            ));
        }
        if !(cls.learning_rate > 0.0) {
            return Err(PipelineError::InvalidConfig(
                "classifier.learning_rate must be positive".into(),
            ));
        }
        if !(cls.subsample > 0.0 && cls.subsample <= 1.0) {
            return Err(PipelineError::InvalidConfig(
                "classifier.subsample must be in (0, 1]".into(),
            ));
        }
        if !(cls.test_fraction > 0.0 && cls.test_fraction < 1.0) {
            return Err(PipelineError::InvalidConfig(
                "classifier.test_fraction must be in (0, 1)".into(),
            ));
        }

        let mut seen = std::collections::BTreeSet::new();
        for binding in &self.sources {
            if !seen.insert(binding.source) {
                return Err(PipelineError::InvalidConfig(format!(
                    "source '{}' is bound more than once",
                    binding.source
                )));
            }
        }
        Ok(())
    }
}
