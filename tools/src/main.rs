//! propensity-runner: headless batch runner for the propensity pipeline.
//!
//! Reads one JSON file per source from the data directory
//! (`install_base.json`, `opportunities.json`, `projects.json`,
//! `service_credits.json`), runs the pipeline, persists the run and
//! prints a summary.
//!
//! Usage:
//!   propensity-runner --data-dir ./data --db run.db --as-of 2024-06-30
//!   propensity-runner --data-dir ./data --train --top 20 --min-confidence 0.5
//!
//! Each file is either `{"columns": [...], "rows": [[...], ...]}` or an
//! array of flat objects.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use propensity_core::{
    classifier::PropensityClassifier,
    config::PipelineConfig,
    pipeline::{PipelineInputs, PipelineOutput, PropensityPipeline},
    store::{ResultStore, RunRecord},
    table::{Table, Value},
    types::{IdScheme, SourceKind, Tier},
};
use std::{env, path::Path};

#[derive(serde::Deserialize)]
#[serde(untagged)]
enum TableFile {
    Table(Table),
    Records(Vec<serde_json::Map<String, serde_json::Value>>),
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let data_dir = string_arg(&args, "--data-dir").unwrap_or("./data");
    let db = string_arg(&args, "--db").unwrap_or(":memory:");
    let train = args.iter().any(|a| a == "--train");

    let config = match string_arg(&args, "--config") {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    let as_of = match string_arg(&args, "--as-of") {
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .with_context(|| format!("--as-of expects YYYY-MM-DD, got {s}"))?,
        None => chrono::Local::now().date_naive(),
    };
    let top_n = parse_arg(&args, "--top", config.ranking.top_n);
    let min_confidence = parse_arg(&args, "--min-confidence", config.ranking.min_confidence);

    println!("propensity-runner");
    println!("  data_dir:  {data_dir}");
    println!("  db:        {db}");
    println!("  as_of:     {as_of}");
    println!();

    let inputs = load_inputs(Path::new(data_dir))?;
    let mut pipeline = PropensityPipeline::build(config.clone(), as_of)?;
    let output = pipeline.run(inputs)?;
    let run_id = output.run_id.clone();

    let store = ResultStore::open(db)?;
    store.migrate()?;
    store.insert_run(&RunRecord {
        run_id:      run_id.clone(),
        as_of:       as_of.to_string(),
        version:     env!("CARGO_PKG_VERSION").to_string(),
        config_json: serde_json::to_string(&config)?,
        started_at:  chrono::Utc::now().to_rfc3339(),
    })?;
    for event in &output.events {
        store.append_event(&event.to_log_entry(&run_id)?)?;
    }
    store.save_roster(&run_id, &output.roster)?;
    store.save_features(&run_id, &output.features)?;

    print_summary(&output);

    if train {
        let mut classifier = PropensityClassifier::new(config.classifier.clone());
        let report = classifier.train(&output.features)?;
        let predictions = classifier.predict(&output.features)?;
        store.save_predictions(&run_id, &predictions)?;
        if let Some(model) = classifier.model() {
            store.save_model_blob(&run_id, &model.to_blob()?, Some(&serde_json::to_string(&report)?))?;
        }

        println!();
        println!("=== CLASSIFIER ===");
        println!("  labels:         {}", report.label_source);
        println!("  train rows:     {}", report.train_rows);
        println!("  test rows:      {}", report.test_rows);
        println!("  train accuracy: {:.3}", report.train_accuracy);
        println!("  test accuracy:  {:.3}", report.test_accuracy);
        println!("  cv mean:        {:.3} over {} folds", report.cv_mean(), report.cv_scores.len());
        println!("  top features:");
        for (feature, weight) in report.feature_importance.iter().take(5) {
            println!("    {:<28} {weight:.3}", feature.name());
        }

        println!();
        println!("=== TOP OPPORTUNITIES (confidence >= {min_confidence}) ===");
        let ranked = store.top_opportunities(&run_id, top_n, min_confidence)?;
        if ranked.is_empty() {
            println!("  (none)");
        }
        for (i, r) in ranked.iter().enumerate() {
            println!(
                "  {:>2}. {:<12} p(high) {:.3}  confidence {:.3}  propensity {:.3}",
                i + 1,
                r.original_id.as_deref().unwrap_or("?"),
                r.prob_high,
                r.confidence,
                r.propensity_score.unwrap_or(0.0)
            );
        }
    }

    log::info!("run {run_id} complete");
    Ok(())
}

fn print_summary(output: &PipelineOutput) {
    let tiers = output.features.tier_counts();
    println!("=== RUN SUMMARY ===");
    println!("  run_id:         {}", output.run_id);
    println!("  customers:      {}", output.roster.len());
    println!("    five-digit:   {}", output.roster.count_scheme(IdScheme::FiveDigit));
    println!("    nine-digit:   {}", output.roster.count_scheme(IdScheme::NineDigit));
    println!("    unresolved:   {}", output.roster.count_scheme(IdScheme::Unresolved));
    println!("  link hints:     {}", output.cross_links.candidates.len());
    println!("  features:       {}", output.features.schema().count());
    for tier in Tier::ALL {
        println!("  tier {:<8}   {}", tier.name(), tiers.get(&tier).copied().unwrap_or(0));
    }
    println!("  warnings:       {}", output.warnings().count());
}

fn load_inputs(dir: &Path) -> Result<PipelineInputs> {
    let mut inputs = PipelineInputs::new();
    for kind in SourceKind::ALL {
        let path = dir.join(format!("{}.json", kind.name()));
        if !path.exists() {
            log::debug!("no file for {kind} at {}", path.display());
            continue;
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Cannot read {}", path.display()))?;
        let file: TableFile = serde_json::from_str(&text)
            .with_context(|| format!("Cannot parse {}", path.display()))?;
        let table = match file {
            TableFile::Table(table) => table,
            TableFile::Records(records) => records_to_table(records),
        };
        log::info!("loaded {kind}: {} rows", table.len());
        inputs.insert(kind, table);
    }
    Ok(inputs)
}

/// Columns are the union of record keys; absent keys read as missing.
fn records_to_table(records: Vec<serde_json::Map<String, serde_json::Value>>) -> Table {
    let mut columns: Vec<String> = Vec::new();
    for record in &records {
        for key in record.keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }
    let mut table = Table::new(columns.clone());
    for record in &records {
        let row = columns
            .iter()
            .map(|c| record.get(c).map(json_cell).unwrap_or(Value::Missing))
            .collect();
        table.push_row(row);
    }
    table
}

fn json_cell(value: &serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Missing,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => n.as_f64().map(Value::Number).unwrap_or(Value::Missing),
        serde_json::Value::String(s) => Value::Text(s.clone()),
        other => Value::Text(other.to_string()),
    }
}

fn string_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
