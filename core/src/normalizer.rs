//! Source normalizer: per-source cleaning ahead of identity resolution.
//!
//! For every source this:
//!   1. Standardizes column names (lowercase, underscored, source aliases)
//!   2. Coerces date and numeric columns; bad cells become Missing
//!   3. Derives per-row fields (days-to-deadline, risk tiers, ratios, flags)
//!
//! A malformed table (ragged rows) is fatal. Everything else degrades.

use crate::{
    config::NormalizerConfig,
    error::PipelineResult,
    event::PipelineEvent,
    table::{Table, Value},
    types::SourceKind,
};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

// ── Column contracts ─────────────────────────────────────────────────────────

/// Columns the normalizer coerces and derives from, per source.
struct ColumnContract {
    aliases:  &'static [(&'static str, &'static str)],
    dates:    &'static [&'static str],
    numerics: &'static [&'static str],
}

fn contract(kind: SourceKind) -> ColumnContract {
    match kind {
        SourceKind::InstallBase => ColumnContract {
            aliases: &[
                ("end_of_life_date", "eol_date"),
                ("end_of_life", "eol_date"),
                ("eol", "eol_date"),
                ("end_of_service_date", "eos_date"),
                ("end_of_service", "eos_date"),
                ("eos", "eos_date"),
                ("platform_name", "platform"),
                ("product_name", "product"),
                ("support", "support_status"),
                ("customer_number", "customer_id"),
            ],
            dates:    &["eol_date", "eos_date"],
            numerics: &[],
        },
        SourceKind::Opportunities => ColumnContract {
            aliases: &[
                ("opportunity_description", "description"),
                ("product_line_name", "product_line"),
                ("account_number", "account_id"),
            ],
            dates:    &[],
            numerics: &[],
        },
        SourceKind::Projects => ColumnContract {
            aliases: &[
                ("project_start_date", "start_date"),
                ("project_status", "status"),
                ("practice_name", "practice"),
                ("total_value", "project_value"),
                ("customer_number", "customer_id"),
            ],
            dates:    &["start_date"],
            numerics: &["project_value"],
        },
        SourceKind::ServiceCredits => ColumnContract {
            aliases: &[
                ("purchased", "purchased_credits"),
                ("active", "active_credits"),
                ("delivered", "delivered_credits"),
                ("contract_end", "contract_end_date"),
                ("end_date", "contract_end_date"),
                ("practice_name", "practice"),
                ("customer_number", "customer_id"),
            ],
            dates:    &["contract_end_date"],
            numerics: &["purchased_credits", "active_credits", "delivered_credits"],
        },
    }
}

// ── Derived categorical fields ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Critical,
    High,
    Medium,
    Low,
    Unknown,
}

impl RiskTier {
    pub fn from_days(days: Option<i64>, config: &NormalizerConfig) -> Self {
        match days {
            None                                => Self::Unknown,
            Some(d) if d < config.critical_days => Self::Critical,
            Some(d) if d < config.high_days     => Self::High,
            Some(d) if d < config.medium_days   => Self::Medium,
            Some(_)                             => Self::Low,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Critical => "Critical",
            Self::High     => "High",
            Self::Medium   => "Medium",
            Self::Low      => "Low",
            Self::Unknown  => "Unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UtilizationStatus {
    Low,
    Medium,
    High,
}

impl UtilizationStatus {
    pub fn from_delivery_rate(rate: f64, config: &NormalizerConfig) -> Self {
        if rate < config.utilization_low {
            Self::Low
        } else if rate < config.utilization_high {
            Self::Medium
        } else {
            Self::High
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Low    => "Low",
            Self::Medium => "Medium",
            Self::High   => "High",
        }
    }
}

// ── Cell coercion ────────────────────────────────────────────────────────────

/// `"Install Date (UTC)"` → `"install_date_utc"`.
pub fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for ch in name.trim().chars() {
        if ch.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.extend(ch.to_lowercase());
        } else {
            pending_sep = true;
        }
    }
    out
}

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d-%b-%Y", "%d %b %Y"];
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Spreadsheet serial day numbers count from this date.
fn spreadsheet_epoch() -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(1899, 12, 30)
}

/// Parse a date cell. Unrecognized input yields `None`; never panics.
pub fn parse_date(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::Date(d) => Some(*d),
        Value::Text(s) => {
            let s = s.trim();
            DATE_FORMATS
                .iter()
                .find_map(|f| NaiveDate::parse_from_str(s, f).ok())
                .or_else(|| {
                    DATETIME_FORMATS
                        .iter()
                        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
                        .map(|dt| dt.date())
                })
        }
        // Spreadsheet serial dates (roughly 1954..2119).
        Value::Number(n) if n.is_finite() && (20_000.0..80_000.0).contains(n) => {
            spreadsheet_epoch().and_then(|e| e.checked_add_signed(Duration::days(*n as i64)))
        }
        _ => None,
    }
}

/// Parse a numeric cell, tolerating thousands separators and currency marks.
pub fn parse_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) if n.is_finite() => Some(*n),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Text(s) => {
            let cleaned: String = s
                .trim()
                .chars()
                .filter(|c| !matches!(c, ',' | '$' | '€' | '£' | ' '))
                .collect();
            cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
        }
        _ => None,
    }
}

/// Ratio with explicit zero fallback: a missing or non-positive denominator,
/// or a missing numerator, yields exactly 0.
pub fn safe_ratio(numerator: Option<f64>, denominator: Option<f64>) -> f64 {
    match (numerator, denominator) {
        (Some(n), Some(d)) if d > 0.0 => n / d,
        _ => 0.0,
    }
}

pub fn days_until(deadline: Option<NaiveDate>, as_of: NaiveDate) -> Option<i64> {
    deadline.map(|d| (d - as_of).num_days())
}

pub fn days_since(start: Option<NaiveDate>, as_of: NaiveDate) -> Option<i64> {
    start.map(|d| (as_of - d).num_days())
}

// ── Normalization ────────────────────────────────────────────────────────────

pub struct SourceNormalizer<'a> {
    config: &'a NormalizerConfig,
    as_of:  NaiveDate,
}

impl<'a> SourceNormalizer<'a> {
    pub fn new(config: &'a NormalizerConfig, as_of: NaiveDate) -> Self {
        Self { config, as_of }
    }

    /// Produce the normalized copy of one raw source table.
    pub fn normalize(
        &self,
        kind: SourceKind,
        raw: &Table,
    ) -> PipelineResult<(Table, Vec<PipelineEvent>)> {
        raw.validate(kind)?;
        let contract = contract(kind);
        let mut events = Vec::new();

        let mut table = raw.clone();
        table.columns = raw
            .columns
            .iter()
            .map(|c| {
                let snake = snake_case(c);
                contract
                    .aliases
                    .iter()
                    .find(|(alias, _)| *alias == snake)
                    .map(|(_, canonical)| canonical.to_string())
                    .unwrap_or(snake)
            })
            .collect();

        for column in contract.dates {
            self.coerce(kind, &mut table, column, parse_date, Value::Date, &mut events);
        }
        for column in contract.numerics {
            self.coerce(kind, &mut table, column, parse_number, Value::Number, &mut events);
        }

        match kind {
            SourceKind::InstallBase    => self.derive_install_base(&mut table),
            SourceKind::Opportunities  => derive_opportunities(&mut table),
            SourceKind::Projects       => self.derive_projects(&mut table),
            SourceKind::ServiceCredits => self.derive_service_credits(&mut table),
        }

        events.push(PipelineEvent::SourceNormalized { source: kind, rows: table.len() });
        Ok((table, events))
    }

    fn coerce<T>(
        &self,
        kind: SourceKind,
        table: &mut Table,
        column: &str,
        parse: fn(&Value) -> Option<T>,
        wrap: fn(T) -> Value,
        events: &mut Vec<PipelineEvent>,
    ) {
        let Some(c) = table.column_index(column) else { return };
        let mut bad = 0usize;
        for row in &mut table.rows {
            let cell = &row[c];
            if cell.is_missing() {
                row[c] = Value::Missing;
                continue;
            }
            row[c] = match parse(cell) {
                Some(v) => wrap(v),
                None => {
                    bad += 1;
                    Value::Missing
                }
            };
        }
        if bad > 0 {
            events.push(PipelineEvent::UnparseableCells {
                source: kind,
                column: column.to_string(),
                count:  bad,
            });
        }
    }

    fn deadline_columns(&self, table: &mut Table, date_col: &str, days_col: &str, risk_col: &str) {
        if !table.has_column(date_col) {
            return;
        }
        let days: Vec<Option<i64>> = (0..table.len())
            .map(|r| days_until(table.cell(r, date_col).as_date(), self.as_of))
            .collect();
        let risk: Vec<Value> = days
            .iter()
            .map(|d| Value::Text(RiskTier::from_days(*d, self.config).label().to_string()))
            .collect();
        table.set_column(days_col, days.into_iter().map(|d| d.map(|v| v as f64).into()).collect());
        table.set_column(risk_col, risk);
    }

    fn derive_install_base(&self, table: &mut Table) {
        self.deadline_columns(table, "eol_date", "days_to_eol", "eol_risk");
        self.deadline_columns(table, "eos_date", "days_to_eos", "eos_risk");

        if table.has_column("support_status") {
            let active: Vec<Value> = (0..table.len())
                .map(|r| {
                    let cell = table.cell(r, "support_status");
                    match cell.as_bool() {
                        Some(b) => Value::Bool(b),
                        None => Value::Bool(is_active_support(cell.as_text())),
                    }
                })
                .collect();
            table.set_column("active_support", active);
        }
    }

    fn derive_projects(&self, table: &mut Table) {
        if table.has_column("start_date") {
            let since: Vec<Value> = (0..table.len())
                .map(|r| {
                    days_since(table.cell(r, "start_date").as_date(), self.as_of)
                        .map(|d| d as f64)
                        .into()
                })
                .collect();
            table.set_column("days_since_start", since);
        }
        if table.has_column("status") {
            let success: Vec<Value> = (0..table.len())
                .map(|r| Value::Bool(is_successful_status(table.cell(r, "status").as_text())))
                .collect();
            table.set_column("success", success);
        }
    }

    fn derive_service_credits(&self, table: &mut Table) {
        self.deadline_columns(table, "contract_end_date", "days_to_contract_end", "contract_risk");

        if !table.has_column("purchased_credits") {
            return;
        }
        let n = table.len();
        let mut utilization = Vec::with_capacity(n);
        let mut delivery = Vec::with_capacity(n);
        let mut status = Vec::with_capacity(n);
        for r in 0..n {
            let purchased = table.cell(r, "purchased_credits").as_f64();
            let active = table.cell(r, "active_credits").as_f64();
            let delivered = table.cell(r, "delivered_credits").as_f64();

            let consumed = match (purchased, active) {
                (Some(p), Some(a)) => Some(p - a),
                _ => None,
            };
            let util = safe_ratio(consumed, purchased);
            let rate = safe_ratio(delivered, purchased);
            utilization.push(Value::Number(util));
            delivery.push(Value::Number(rate));
            status.push(Value::Text(
                UtilizationStatus::from_delivery_rate(rate, self.config).label().to_string(),
            ));
        }
        if table.has_column("active_credits") {
            table.set_column("utilization", utilization);
        }
        if table.has_column("delivered_credits") {
            table.set_column("delivery_rate", delivery);
            table.set_column("utilization_status", status);
        }
    }
}

fn derive_opportunities(table: &mut Table) {
    if table.has_column("description") {
        let lengths: Vec<Value> = (0..table.len())
            .map(|r| {
                table
                    .cell(r, "description")
                    .as_text()
                    .map(|t| t.trim().chars().count() as f64)
                    .into()
            })
            .collect();
        table.set_column("description_length", lengths);
    }
}

fn is_active_support(status: Option<&str>) -> bool {
    match status {
        Some(s) => {
            let s = s.to_lowercase();
            (s.contains("active") && !s.contains("inactive")) || s.contains("covered")
        }
        None => false,
    }
}

/// Projects whose status text mentions completion count as successes.
pub fn is_successful_status(status: Option<&str>) -> bool {
    status.is_some_and(|s| s.to_lowercase().contains("complete"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
    }

    #[test]
    fn snake_case_collapses_separators() {
        assert_eq!(snake_case("  EOL Date (UTC) "), "eol_date_utc");
        assert_eq!(snake_case("Customer-ID"), "customer_id");
        assert_eq!(snake_case("purchased__credits"), "purchased_credits");
    }

    #[test]
    fn dates_parse_in_common_formats() {
        let expected = NaiveDate::from_ymd_opt(2025, 3, 4);
        assert_eq!(parse_date(&"2025-03-04".into()), expected);
        assert_eq!(parse_date(&"2025/03/04".into()), expected);
        assert_eq!(parse_date(&"03/04/2025".into()), expected);
        assert_eq!(parse_date(&"04-Mar-2025".into()), expected);
        assert_eq!(parse_date(&"2025-03-04 10:30:00".into()), expected);
        assert_eq!(parse_date(&"not a date".into()), None);
        assert_eq!(parse_date(&Value::Missing), None);
    }

    #[test]
    fn risk_tier_thresholds() {
        let cfg = NormalizerConfig::default();
        assert_eq!(RiskTier::from_days(Some(-5), &cfg), RiskTier::Critical);
        assert_eq!(RiskTier::from_days(Some(179), &cfg), RiskTier::Critical);
        assert_eq!(RiskTier::from_days(Some(180), &cfg), RiskTier::High);
        assert_eq!(RiskTier::from_days(Some(500), &cfg), RiskTier::Medium);
        assert_eq!(RiskTier::from_days(Some(730), &cfg), RiskTier::Low);
        assert_eq!(RiskTier::from_days(None, &cfg), RiskTier::Unknown);
    }

    #[test]
    fn safe_ratio_never_divides_by_zero() {
        assert_eq!(safe_ratio(Some(40.0), Some(100.0)), 0.4);
        assert_eq!(safe_ratio(Some(40.0), Some(0.0)), 0.0);
        assert_eq!(safe_ratio(Some(40.0), None), 0.0);
        assert_eq!(safe_ratio(None, Some(100.0)), 0.0);
        assert_eq!(safe_ratio(Some(5.0), Some(-3.0)), 0.0);
    }

    #[test]
    fn numbers_tolerate_formatting() {
        assert_eq!(parse_number(&" 1,250 ".into()), Some(1250.0));
        assert_eq!(parse_number(&"$3.5".into()), Some(3.5));
        assert_eq!(parse_number(&"n/a".into()), None);
    }

    #[test]
    fn install_base_days_are_relative_to_as_of() {
        let cfg = NormalizerConfig::default();
        let raw = Table::new(["Customer ID", "EOL Date"])
            .with_row(vec!["10001".into(), "2025-01-11".into()])
            .with_row(vec!["10002".into(), "garbage".into()]);
        let (table, events) = SourceNormalizer::new(&cfg, as_of())
            .normalize(SourceKind::InstallBase, &raw)
            .unwrap();

        assert_eq!(table.cell(0, "days_to_eol").as_f64(), Some(10.0));
        assert_eq!(table.cell(0, "eol_risk").as_text(), Some("Critical"));
        assert!(table.cell(1, "days_to_eol").is_missing());
        assert_eq!(table.cell(1, "eol_risk").as_text(), Some("Unknown"));
        assert!(events.iter().any(|e| matches!(
            e,
            PipelineEvent::UnparseableCells { column, count: 1, .. } if column == "eol_date"
        )));
    }
}
