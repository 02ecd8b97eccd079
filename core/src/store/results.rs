use super::{RankedOpportunity, ResultStore};
use crate::{
    classifier::Prediction,
    error::PipelineResult,
    features::{Feature, FeatureTable},
    identity::CustomerRoster,
    types::{SourceKind, Tier},
};
use rusqlite::{params, OptionalExtension};
use std::collections::BTreeMap;

impl ResultStore {
    // ── Roster ─────────────────────────────────────────────────

    pub fn save_roster(&self, run_id: &str, roster: &CustomerRoster) -> PipelineResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO customer_roster (
                     run_id, unified_id, original_id, id_scheme, contributing_sources, display_name
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for c in roster.iter() {
                let sources: Vec<&str> = c.contributing_sources.iter().map(SourceKind::name).collect();
                stmt.execute(params![
                    run_id,
                    c.unified_id as i64,
                    c.original_id,
                    c.id_scheme.name(),
                    serde_json::to_string(&sources)?,
                    c.display_name,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn roster_count(&self, run_id: &str) -> PipelineResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM customer_roster WHERE run_id = ?1",
            params![run_id],
            |r| r.get(0),
        )?)
    }

    // ── Feature rows ───────────────────────────────────────────

    /// One row per customer; the features are stored as a name → number map.
    pub fn save_features(&self, run_id: &str, features: &FeatureTable) -> PipelineResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO feature_row (
                     run_id, unified_id, original_id, id_scheme, tier, propensity_score, features_json
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for row in features.rows() {
                let values: BTreeMap<&str, f64> = row
                    .values()
                    .map(|(f, v)| (f.name(), v.as_f64()))
                    .collect();
                stmt.execute(params![
                    run_id,
                    row.unified_id as i64,
                    row.original_id,
                    row.id_scheme.name(),
                    row.tier().map(|t| t.name()),
                    row.get(Feature::PropensityScore).map(|v| v.as_f64()),
                    serde_json::to_string(&values)?,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Stored feature map of one customer.
    pub fn load_feature_row(
        &self,
        run_id: &str,
        unified_id: u64,
    ) -> PipelineResult<Option<BTreeMap<String, f64>>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT features_json FROM feature_row WHERE run_id = ?1 AND unified_id = ?2",
                params![run_id, unified_id as i64],
                |r| r.get(0),
            )
            .optional()?;
        match json {
            Some(j) => Ok(Some(serde_json::from_str(&j)?)),
            None => Ok(None),
        }
    }

    // ── Predictions ────────────────────────────────────────────

    pub fn save_predictions(&self, run_id: &str, predictions: &[Prediction]) -> PipelineResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO prediction (
                     run_id, unified_id, predicted_tier, prob_low, prob_medium, prob_high, confidence
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(run_id, unified_id) DO UPDATE SET
                     predicted_tier = excluded.predicted_tier,
                     prob_low       = excluded.prob_low,
                     prob_medium    = excluded.prob_medium,
                     prob_high      = excluded.prob_high,
                     confidence     = excluded.confidence",
            )?;
            for p in predictions {
                stmt.execute(params![
                    run_id,
                    p.unified_id as i64,
                    p.predicted_tier.name(),
                    p.probability(Tier::Low),
                    p.probability(Tier::Medium),
                    p.probability(Tier::High),
                    p.confidence,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Downstream ranking: customers predicted High with at least
    /// `min_confidence`, best high-probability first, then by propensity
    /// score. At most `n` rows.
    pub fn top_opportunities(
        &self,
        run_id: &str,
        n: usize,
        min_confidence: f64,
    ) -> PipelineResult<Vec<RankedOpportunity>> {
        let mut stmt = self.conn.prepare(
            "SELECT p.unified_id, f.original_id, f.id_scheme, f.propensity_score,
                    p.prob_high, p.confidence
             FROM prediction p
             LEFT JOIN feature_row f ON f.run_id = p.run_id AND f.unified_id = p.unified_id
             WHERE p.run_id = ?1 AND p.predicted_tier = ?2 AND p.confidence >= ?3
             ORDER BY p.prob_high DESC, COALESCE(f.propensity_score, 0) DESC, p.unified_id ASC
             LIMIT ?4",
        )?;
        let rows = stmt
            .query_map(
                params![run_id, Tier::High.name(), min_confidence, n as i64],
                |r| {
                    Ok(RankedOpportunity {
                        unified_id:       r.get::<_, i64>(0)? as u64,
                        original_id:      r.get(1)?,
                        id_scheme:        r.get(2)?,
                        propensity_score: r.get(3)?,
                        prob_high:        r.get(4)?,
                        confidence:       r.get(5)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Model blob ─────────────────────────────────────────────

    /// Store the serialized model of a run, with an optional training
    /// report alongside. Saving again replaces both.
    pub fn save_model_blob(&self, run_id: &str, blob: &str, report: Option<&str>) -> PipelineResult<()> {
        self.conn.execute(
            "INSERT INTO model_blob (run_id, blob, report) VALUES (?1, ?2, ?3)
             ON CONFLICT(run_id) DO UPDATE SET blob = excluded.blob, report = excluded.report",
            params![run_id, blob, report],
        )?;
        Ok(())
    }

    pub fn load_model_blob(&self, run_id: &str) -> PipelineResult<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT blob FROM model_blob WHERE run_id = ?1",
                params![run_id],
                |r| r.get(0),
            )
            .optional()?)
    }
}
