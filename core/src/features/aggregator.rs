//! One generic aggregation routine driven by per-source spec tables.
//!
//! For each source:
//!   1. Skip the source when it has neither its identifier column nor any
//!      expected column.
//!   2. Pick the spec entries whose input column exists; log the rest.
//!      Row-level entries (no column) need only the grouping.
//!   3. Group source rows by resolved unified_id (or, for sources that allow
//!      it, treat the whole table as one broadcast group when the source has
//!      no identifier column).
//!   4. Aggregate every customer on the roster (left join: customers with no
//!      rows aggregate an empty group).
//!   5. Compute derived features from the raw aggregates.
//!   6. Fill pass: anything still missing takes the spec's fallback.
//!   7. Append the finished columns to the feature table.

use crate::{
    config::{AggregationConfig, PipelineConfig},
    error::PipelineResult,
    event::PipelineEvent,
    features::{Feature, FeatureTable, FeatureValue},
    identity::CustomerRoster,
    table::{Table, Value},
    types::{SourceKind, UnifiedId},
};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// How one column collapses over a customer's rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    /// Number of rows in the group.
    Rows,
    /// Whether the group has any row at all.
    AnyRow,
    /// Non-missing cells.
    Count,
    /// Distinct non-missing values, case-insensitive.
    NUnique,
    Sum,
    Mean,
    Min,
    Max,
    /// Cells that read as true.
    CountTrue,
    /// Cells holding non-blank text.
    CountNonEmpty,
}

impl Aggregation {
    /// `None` means "no data" (mean/min/max of an empty group).
    pub fn apply<'a>(&self, cells: impl Iterator<Item = &'a Value>) -> Option<f64> {
        match self {
            Self::Rows => Some(cells.count() as f64),
            Self::AnyRow => Some(if cells.count() > 0 { 1.0 } else { 0.0 }),
            Self::Count => Some(cells.filter(|v| !v.is_missing()).count() as f64),
            Self::NUnique => Some(
                cells
                    .filter_map(|v| v.key())
                    .map(|k| k.to_lowercase())
                    .collect::<BTreeSet<_>>()
                    .len() as f64,
            ),
            Self::Sum => Some(cells.filter_map(Value::as_f64).sum()),
            Self::Mean => {
                let (sum, n) = cells
                    .filter_map(Value::as_f64)
                    .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
                (n > 0).then(|| sum / n as f64)
            }
            Self::Min => cells.filter_map(Value::as_f64).reduce(f64::min),
            Self::Max => cells.filter_map(Value::as_f64).reduce(f64::max),
            Self::CountTrue => Some(cells.filter(|v| v.as_bool() == Some(true)).count() as f64),
            Self::CountNonEmpty => Some(cells.filter(|v| v.as_text().is_some()).count() as f64),
        }
    }
}

/// One aggregated feature: name → (column, aggregation) → fallback.
#[derive(Debug, Clone, Copy)]
pub struct FeatureSpec {
    pub feature:     Feature,
    /// `None` for row-level aggregations that read no column.
    pub column:      Option<&'static str>,
    pub aggregation: Aggregation,
    pub fallback:    FeatureValue,
}

/// Raw aggregates of the inputs, in declared order; `None` = no data.
pub type DeriveFn = fn(&[Option<f64>], &AggregationConfig) -> Option<f64>;

/// A feature computed from other features of the same source.
#[derive(Clone, Copy)]
pub struct DerivedSpec {
    pub feature:  Feature,
    pub inputs:   &'static [Feature],
    pub derive:   DeriveFn,
    pub fallback: FeatureValue,
}

/// The complete feature surface of one source.
#[derive(Clone, Copy)]
pub struct SourceFeatureSpec {
    pub source:   SourceKind,
    pub features: &'static [FeatureSpec],
    pub derived:  &'static [DerivedSpec],
    /// Aggregate the whole table once and apply it to every customer when
    /// the identifier column is absent.
    pub broadcast_when_unkeyed: bool,
}

impl SourceFeatureSpec {
    fn expected_columns(&self) -> BTreeSet<&'static str> {
        self.features.iter().filter_map(|f| f.column).collect()
    }
}

/// Placeholder cell for row-level aggregations.
static NO_COLUMN: Value = Value::Missing;

enum Grouping {
    Keyed(HashMap<UnifiedId, Vec<usize>>),
    Broadcast,
}

pub struct FeatureAggregator<'a> {
    config: &'a PipelineConfig,
}

impl<'a> FeatureAggregator<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    fn thresholds(&self) -> &'a AggregationConfig {
        &self.config.aggregation
    }

    /// Run one source's spec and append its columns to `features`.
    /// A source that cannot contribute leaves `features` untouched.
    pub fn apply(
        &self,
        spec: &SourceFeatureSpec,
        table: Option<&Table>,
        roster: &CustomerRoster,
        features: &mut FeatureTable,
    ) -> PipelineResult<Vec<PipelineEvent>> {
        let mut events = Vec::new();
        let skip = |reason: &str| PipelineEvent::FeatureGroupSkipped {
            source: spec.source,
            reason: reason.to_string(),
        };

        let Some(table) = table else {
            events.push(skip("source absent"));
            return Ok(events);
        };

        let groups = self.group_rows(spec.source, table, roster);
        let expected = spec.expected_columns();
        if groups.is_none() && !expected.iter().any(|c| table.has_column(c)) {
            events.push(skip("neither the identifier nor any expected column is present"));
            return Ok(events);
        }

        let available: Vec<&FeatureSpec> = spec
            .features
            .iter()
            .filter(|f| match f.column {
                Some(col) if !table.has_column(col) => {
                    events.push(PipelineEvent::FeatureSkipped {
                        source:  spec.source,
                        feature: f.feature.name().to_string(),
                        column:  col.to_string(),
                    });
                    false
                }
                _ => true,
            })
            .collect();
        let available_set: BTreeSet<Feature> = available.iter().map(|f| f.feature).collect();
        let derived: Vec<&DerivedSpec> = spec
            .derived
            .iter()
            .filter(|d| d.inputs.iter().all(|i| available_set.contains(i)))
            .collect();

        let grouping = match groups {
            Some(groups) => Grouping::Keyed(groups),
            None if spec.broadcast_when_unkeyed => {
                events.push(PipelineEvent::BroadcastApplied {
                    source:   spec.source,
                    features: available.len() + derived.len(),
                });
                Grouping::Broadcast
            }
            None => {
                events.push(skip("no identifier column"));
                return Ok(events);
            }
        };

        let all_rows: Vec<usize> = (0..table.len()).collect();
        let empty: Vec<usize> = Vec::new();
        let mut columns: BTreeMap<Feature, Vec<FeatureValue>> = BTreeMap::new();

        // The broadcast group is the same for everyone; aggregate it once.
        let shared = match &grouping {
            Grouping::Broadcast => self.aggregate_group(table, &all_rows, &available, &derived),
            Grouping::Keyed(_) => Vec::new(),
        };

        for row in features.rows() {
            let values = match &grouping {
                Grouping::Broadcast => shared.clone(),
                Grouping::Keyed(groups) => {
                    let rows = groups.get(&row.unified_id).unwrap_or(&empty);
                    self.aggregate_group(table, rows, &available, &derived)
                }
            };
            for (feature, value) in values {
                columns.entry(feature).or_default().push(value);
            }
        }

        // Spec order, aggregated features first, then derived.
        let order = available.iter().map(|f| f.feature).chain(derived.iter().map(|d| d.feature));
        for feature in order {
            let values = columns.remove(&feature).unwrap_or_default();
            features.append_column(feature, values)?;
        }

        log::debug!(
            "aggregate: {} contributed {} features",
            spec.source,
            available.len() + derived.len()
        );
        Ok(events)
    }

    /// Map each source row to its canonical customer.
    /// `None` when the source has no usable identifier column.
    fn group_rows(
        &self,
        source: SourceKind,
        table: &Table,
        roster: &CustomerRoster,
    ) -> Option<HashMap<UnifiedId, Vec<usize>>> {
        let binding = self.config.binding(source)?;
        let id_col = table.column_index(&binding.id_column)?;
        let mut groups: HashMap<UnifiedId, Vec<usize>> = HashMap::new();
        for (i, row) in table.rows.iter().enumerate() {
            if let Some(id) = roster.lookup(binding.scheme, &row[id_col]) {
                groups.entry(id).or_default().push(i);
            }
        }
        Some(groups)
    }

    /// Aggregate, derive, then fill one group of rows.
    fn aggregate_group(
        &self,
        table: &Table,
        rows: &[usize],
        available: &[&FeatureSpec],
        derived: &[&DerivedSpec],
    ) -> Vec<(Feature, FeatureValue)> {
        let mut raw: BTreeMap<Feature, Option<f64>> = BTreeMap::new();
        let mut out = Vec::with_capacity(available.len() + derived.len());

        for spec in available {
            let value = match spec.column {
                Some(col) => spec.aggregation.apply(rows.iter().map(|&r| table.cell(r, col))),
                None => spec.aggregation.apply(rows.iter().map(|_| &NO_COLUMN)),
            };
            raw.insert(spec.feature, value);
            out.push((spec.feature, fill(spec.feature, value, spec.fallback)));
        }

        for spec in derived {
            let inputs: Vec<Option<f64>> = spec
                .inputs
                .iter()
                .map(|f| raw.get(f).copied().flatten())
                .collect();
            let value = (spec.derive)(&inputs, self.thresholds());
            out.push((spec.feature, fill(spec.feature, value, spec.fallback)));
        }
        out
    }
}

fn fill(feature: Feature, value: Option<f64>, fallback: FeatureValue) -> FeatureValue {
    match value {
        Some(v) if v.is_finite() => FeatureValue::for_feature(feature, v),
        _ => fallback,
    }
}
