//! SQLite persistence layer for run results.
//!
//! RULE: Only the store talks to the database.
//! Stages and the classifier never execute SQL; callers hand finished
//! outputs to store methods.

mod results;

use crate::{error::PipelineResult, event::EventLogEntry};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

pub struct ResultStore {
    conn: Connection,
}

/// One row of the downstream ranking query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedOpportunity {
    pub unified_id:       u64,
    pub original_id:      Option<String>,
    pub id_scheme:        Option<String>,
    pub propensity_score: Option<f64>,
    pub prob_high:        f64,
    pub confidence:       f64,
}

/// A stored run header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id:      String,
    pub as_of:       String,
    pub version:     String,
    pub config_json: String,
    pub started_at:  String,
}

impl ResultStore {
    pub fn open(path: &str) -> PipelineResult<Self> {
        let conn = Connection::open(path)?;
        // WAL mode only for real files; :memory: ignores it.
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> PipelineResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> PipelineResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        Ok(())
    }

    // ── Run ────────────────────────────────────────────────────

    pub fn insert_run(&self, run: &RunRecord) -> PipelineResult<()> {
        self.conn.execute(
            "INSERT INTO run (run_id, as_of, version, config_json, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![run.run_id, run.as_of, run.version, run.config_json, run.started_at],
        )?;
        Ok(())
    }

    pub fn get_run(&self, run_id: &str) -> PipelineResult<Option<RunRecord>> {
        let run = self
            .conn
            .query_row(
                "SELECT run_id, as_of, version, config_json, started_at FROM run WHERE run_id = ?1",
                params![run_id],
                |r| {
                    Ok(RunRecord {
                        run_id:      r.get(0)?,
                        as_of:       r.get(1)?,
                        version:     r.get(2)?,
                        config_json: r.get(3)?,
                        started_at:  r.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(run)
    }

    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, entry: &EventLogEntry) -> PipelineResult<()> {
        self.conn.execute(
            "INSERT INTO event_log (run_id, seq, stage, event_type, payload)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.run_id,
                entry.seq as i64,
                entry.stage,
                entry.event_type,
                entry.payload,
            ],
        )?;
        Ok(())
    }

    pub fn events_for_run(&self, run_id: &str) -> PipelineResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, run_id, seq, stage, event_type, payload
             FROM event_log WHERE run_id = ?1
             ORDER BY seq ASC, id ASC",
        )?;
        let entries = stmt
            .query_map(params![run_id], |row| {
                Ok(EventLogEntry {
                    id: Some(row.get(0)?),
                    run_id: row.get(1)?,
                    seq: row.get::<_, i64>(2)? as u64,
                    stage: row.get(3)?,
                    event_type: row.get(4)?,
                    payload: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}
