//! Stage trait and the four built-in stages.
//!
//! RULE: Every pipeline step implements PipelineStage.
//! The pipeline calls run() on each registered stage once, in
//! registration order. Execution order is fixed and documented in
//! pipeline.rs.

use crate::{
    error::PipelineResult,
    event::PipelineEvent,
    features::{aggregator::FeatureAggregator, sources, FeatureTable},
    identity::{CrossLinkReport, CrossSchemeMatcher, IdentityResolver, NameTokenMatcher},
    normalizer::SourceNormalizer,
    pipeline::PipelineContext,
    scoring::CompositeScorer,
    types::SourceKind,
};

/// The contract every stage must fulfill.
pub trait PipelineStage {
    /// Unique stable name for this stage.
    fn name(&self) -> &'static str;

    /// Read what earlier stages left in `ctx`, write this stage's output
    /// back into it, and return the diagnostics raised along the way.
    fn run(&mut self, ctx: &mut PipelineContext) -> PipelineResult<Vec<PipelineEvent>>;
}

// ── 1. Normalize ─────────────────────────────────────────────────────────────

pub struct NormalizeStage;

impl PipelineStage for NormalizeStage {
    fn name(&self) -> &'static str { "normalize" }

    fn run(&mut self, ctx: &mut PipelineContext) -> PipelineResult<Vec<PipelineEvent>> {
        let normalizer = SourceNormalizer::new(&ctx.config.normalizer, ctx.as_of);
        let mut events = Vec::new();
        for kind in SourceKind::ALL {
            let Some(raw) = ctx.inputs.get(&kind) else {
                events.push(PipelineEvent::SourceAbsent { source: kind });
                continue;
            };
            let (table, source_events) = normalizer.normalize(kind, raw)?;
            events.extend(source_events);
            ctx.normalized.insert(kind, table);
        }
        Ok(events)
    }
}

// ── 2. Resolve ───────────────────────────────────────────────────────────────

pub struct ResolveStage {
    matcher: Box<dyn CrossSchemeMatcher>,
}

impl ResolveStage {
    pub fn new(matcher: Box<dyn CrossSchemeMatcher>) -> Self {
        Self { matcher }
    }

    pub fn with_name_matching(threshold: f64) -> Self {
        Self::new(Box::new(NameTokenMatcher { threshold }))
    }
}

impl PipelineStage for ResolveStage {
    fn name(&self) -> &'static str { "resolve" }

    fn run(&mut self, ctx: &mut PipelineContext) -> PipelineResult<Vec<PipelineEvent>> {
        let (roster, mut events) = IdentityResolver::new(&ctx.config).resolve(&ctx.normalized);
        let links = CrossLinkReport::build(&roster, self.matcher.as_ref());
        if !links.unlinked.is_empty() {
            events.push(PipelineEvent::CrossLinkUnresolved {
                unlinked:   links.unlinked.len(),
                candidates: links.candidates.len(),
            });
        }
        log::info!(
            "resolve: {} customers, {} cross-scheme candidates via {}",
            roster.len(),
            links.candidates.len(),
            self.matcher.name()
        );
        ctx.roster = roster;
        ctx.cross_links = links;
        Ok(events)
    }
}

// ── 3. Aggregate ─────────────────────────────────────────────────────────────

pub struct AggregateStage;

impl PipelineStage for AggregateStage {
    fn name(&self) -> &'static str { "aggregate" }

    fn run(&mut self, ctx: &mut PipelineContext) -> PipelineResult<Vec<PipelineEvent>> {
        let aggregator = FeatureAggregator::new(&ctx.config);
        let mut features = FeatureTable::from_roster(&ctx.roster);
        let mut events = Vec::new();
        for spec in sources::all_specs() {
            let table = ctx.normalized.get(&spec.source);
            events.extend(aggregator.apply(spec, table, &ctx.roster, &mut features)?);
        }
        ctx.features = features;
        Ok(events)
    }
}

// ── 4. Score ─────────────────────────────────────────────────────────────────

pub struct ScoreStage;

impl PipelineStage for ScoreStage {
    fn name(&self) -> &'static str { "score" }

    fn run(&mut self, ctx: &mut PipelineContext) -> PipelineResult<Vec<PipelineEvent>> {
        CompositeScorer::new(&ctx.config.scoring).score(&mut ctx.features)
    }
}
