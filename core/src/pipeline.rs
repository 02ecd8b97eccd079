//! The propensity pipeline driver.
//!
//! EXECUTION ORDER (fixed, documented, never reordered):
//!   1. normalize   raw source tables → normalized tables
//!   2. resolve     normalized tables → canonical roster + cross-link report
//!   3. aggregate   roster + tables   → one FeatureRow per customer
//!   4. score       feature table     → RFM, urgency, propensity, tier
//!
//! The classifier is not a stage. Callers train and predict on the
//! finished feature table (see classifier/).
//!
//! RULES:
//!   - Stages run in registration order, exactly once per run.
//!   - Stages communicate only through the PipelineContext.
//!   - Every stage-level event is recorded in the run's event log.

use crate::{
    config::PipelineConfig,
    error::{PipelineError, PipelineResult},
    event::{EventLogEntry, PipelineEvent},
    features::FeatureTable,
    identity::{CrossLinkReport, CustomerRoster},
    stage::{AggregateStage, NormalizeStage, PipelineStage, ResolveStage, ScoreStage},
    table::Table,
    types::{RunId, SourceKind},
};
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// Raw source tables keyed by source.
pub type PipelineInputs = BTreeMap<SourceKind, Table>;

/// Everything the stages read and write during one run.
pub struct PipelineContext {
    pub run_id:      RunId,
    pub config:      PipelineConfig,
    pub as_of:       NaiveDate,
    pub inputs:      PipelineInputs,
    pub normalized:  BTreeMap<SourceKind, Table>,
    pub roster:      CustomerRoster,
    pub cross_links: CrossLinkReport,
    pub features:    FeatureTable,
}

/// One event with the stage that raised it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    pub seq:   u64,
    pub stage: String,
    pub event: PipelineEvent,
}

impl RecordedEvent {
    pub fn to_log_entry(&self, run_id: &str) -> PipelineResult<EventLogEntry> {
        Ok(EventLogEntry {
            id:         None,
            run_id:     run_id.to_string(),
            seq:        self.seq,
            stage:      self.stage.clone(),
            event_type: self.event.event_type().to_string(),
            payload:    serde_json::to_string(&self.event)?,
        })
    }
}

pub struct PipelineOutput {
    pub run_id:      RunId,
    pub as_of:       NaiveDate,
    pub roster:      CustomerRoster,
    pub features:    FeatureTable,
    pub cross_links: CrossLinkReport,
    pub events:      Vec<RecordedEvent>,
}

impl PipelineOutput {
    pub fn warnings(&self) -> impl Iterator<Item = &RecordedEvent> {
        self.events.iter().filter(|e| e.event.is_warning())
    }
}

pub struct PropensityPipeline {
    run_id: RunId,
    config: PipelineConfig,
    as_of:  NaiveDate,
    stages: Vec<Box<dyn PipelineStage>>,
}

impl PropensityPipeline {
    /// An empty pipeline with a fresh run id. Fails on invalid config.
    pub fn new(config: PipelineConfig, as_of: NaiveDate) -> PipelineResult<Self> {
        config.validate()?;
        Ok(Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            config,
            as_of,
            stages: Vec::new(),
        })
    }

    /// Build a fully wired pipeline with all stages registered.
    /// Call this instead of new() + manual register() calls.
    pub fn build(config: PipelineConfig, as_of: NaiveDate) -> PipelineResult<Self> {
        let threshold = config.identity.name_match_threshold;
        let mut pipeline = Self::new(config, as_of)?;

        // EXECUTION ORDER: fixed, never reordered.
        pipeline.register(Box::new(NormalizeStage));
        pipeline.register(Box::new(ResolveStage::with_name_matching(threshold)));
        pipeline.register(Box::new(AggregateStage));
        pipeline.register(Box::new(ScoreStage));
        Ok(pipeline)
    }

    /// Replace the generated run id (replays, tests).
    pub fn with_run_id(mut self, run_id: impl Into<RunId>) -> Self {
        self.run_id = run_id.into();
        self
    }

    /// Register a stage. Call in the documented execution order.
    pub fn register(&mut self, stage: Box<dyn PipelineStage>) {
        self.stages.push(stage);
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every stage over `inputs`.
    pub fn run(&mut self, inputs: PipelineInputs) -> PipelineResult<PipelineOutput> {
        for binding in self.config.sources.iter().filter(|b| b.required) {
            if !inputs.contains_key(&binding.source) {
                return Err(PipelineError::MissingSource { source_kind: binding.source });
            }
        }

        let mut ctx = PipelineContext {
            run_id:      self.run_id.clone(),
            config:      self.config.clone(),
            as_of:       self.as_of,
            inputs,
            normalized:  BTreeMap::new(),
            roster:      CustomerRoster::default(),
            cross_links: CrossLinkReport::default(),
            features:    FeatureTable::default(),
        };
        let mut recorder = EventRecorder::default();
        recorder.record(
            "pipeline",
            PipelineEvent::RunInitialized { run_id: self.run_id.clone(), as_of: self.as_of },
        );

        for stage in &mut self.stages {
            let name = stage.name();
            recorder.record(name, PipelineEvent::StageStarted { stage: name.to_string() });
            let events = stage.run(&mut ctx)?;
            for event in events {
                recorder.record(name, event);
            }
            recorder.record(name, PipelineEvent::StageCompleted { stage: name.to_string() });
        }

        log::info!(
            "pipeline {}: {} customers, {} features, {} warnings",
            self.run_id,
            ctx.features.len(),
            ctx.features.schema().count(),
            recorder.events.iter().filter(|e| e.event.is_warning()).count()
        );

        Ok(PipelineOutput {
            run_id:      ctx.run_id,
            as_of:       ctx.as_of,
            roster:      ctx.roster,
            features:    ctx.features,
            cross_links: ctx.cross_links,
            events:      recorder.events,
        })
    }
}

#[derive(Default)]
struct EventRecorder {
    events: Vec<RecordedEvent>,
}

impl EventRecorder {
    fn record(&mut self, stage: &str, event: PipelineEvent) {
        event.log(stage);
        self.events.push(RecordedEvent {
            seq: self.events.len() as u64,
            stage: stage.to_string(),
            event,
        });
    }
}
