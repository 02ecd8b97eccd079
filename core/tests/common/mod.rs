#![allow(dead_code)]

use chrono::{Duration, NaiveDate};
use propensity_core::{
    pipeline::PipelineInputs,
    table::{Table, Value},
    types::SourceKind,
};

/// Route pipeline logs through the test harness (`RUST_LOG=debug`).
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn as_of() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 30).expect("valid date")
}

/// `as_of` shifted by `days`, formatted the way spreadsheets export it.
pub fn date_text(days: i64) -> Value {
    Value::Text((as_of() + Duration::days(days)).format("%Y-%m-%d").to_string())
}

pub fn table(columns: &[&str], rows: Vec<Vec<Value>>) -> Table {
    let mut t = Table::new(columns.iter().copied());
    for row in rows {
        t.push_row(row);
    }
    t
}

pub fn install_base(rows: &[(&str, &str, &str, Option<i64>)]) -> Table {
    table(
        &["Customer ID", "Customer Name", "Platform", "EOL Date", "Support Status"],
        rows.iter()
            .map(|(id, name, platform, eol)| {
                vec![
                    (*id).into(),
                    (*name).into(),
                    (*platform).into(),
                    eol.map(date_text).unwrap_or(Value::Missing),
                    "Active".into(),
                ]
            })
            .collect(),
    )
}

pub fn opportunities(rows: &[(&str, &str, &str)]) -> Table {
    table(
        &["Account ID", "Account Name", "Product Line", "Description"],
        rows.iter()
            .map(|(id, name, line)| {
                vec![(*id).into(), (*name).into(), (*line).into(), "Refresh of core switching".into()]
            })
            .collect(),
    )
}

/// (customer_id, days since start, status, value, practice)
pub fn projects(rows: &[(&str, i64, &str, f64, &str)]) -> Table {
    table(
        &["Customer ID", "Project Start Date", "Project Status", "Total Value", "Practice", "Country"],
        rows.iter()
            .map(|(id, since, status, value, practice)| {
                vec![
                    (*id).into(),
                    date_text(-since),
                    (*status).into(),
                    Value::Number(*value),
                    (*practice).into(),
                    "US".into(),
                ]
            })
            .collect(),
    )
}

/// (customer_id, purchased, active, delivered, days to contract end)
pub fn service_credits(rows: &[(&str, f64, f64, f64, i64)]) -> Table {
    table(
        &["Customer ID", "Purchased", "Active", "Delivered", "Contract End", "Practice"],
        rows.iter()
            .map(|(id, purchased, active, delivered, end)| {
                vec![
                    (*id).into(),
                    Value::Number(*purchased),
                    Value::Number(*active),
                    Value::Number(*delivered),
                    date_text(*end),
                    "Data Center".into(),
                ]
            })
            .collect(),
    )
}

/// A deterministic batch of `n` five-digit customers with every source
/// populated and plenty of spread in the scoring inputs.
pub fn population(n: usize) -> PipelineInputs {
    let platforms = ["Nexus", "Catalyst", "UCS", "ASR"];
    let practices = ["Security", "Data Center", "Collaboration"];

    let mut ib = Vec::new();
    let mut proj = Vec::new();
    let mut credits = Vec::new();
    let ids: Vec<String> = (0..n).map(|i| format!("{}", 10_000 + i)).collect();

    for (i, id) in ids.iter().enumerate() {
        for p in 0..(i % 4 + 1) {
            let eol = ((i * 97 + p * 131) % 1500) as i64 - 100;
            ib.push((id.as_str(), "Customer", platforms[(i + p) % 4], Some(eol)));
        }
        for p in 0..(i % 3) {
            let since = ((i * 37 + p * 53) % 400) as i64;
            let status = if (i + p) % 2 == 0 { "Completed" } else { "In Progress" };
            let value = 10_000.0 + ((i * 7919 + p * 104_729) % 90_000) as f64;
            proj.push((id.as_str(), since, status, value, practices[(i + p) % 3]));
        }
        if i % 5 != 0 {
            let purchased = 100.0 + (i % 7) as f64 * 50.0;
            let active = purchased * ((i % 10) as f64 / 10.0);
            let delivered = purchased - active;
            credits.push((id.as_str(), purchased, active, delivered, ((i * 61) % 500) as i64 - 30));
        }
    }

    let mut inputs = PipelineInputs::new();
    inputs.insert(SourceKind::InstallBase, install_base(&ib));
    inputs.insert(SourceKind::Projects, projects(&proj));
    inputs.insert(SourceKind::ServiceCredits, service_credits(&credits));
    inputs
}
