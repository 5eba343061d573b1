//! Schema drift detection
//!
//! Compares the live schema of the primary database with the manifest. This
//! runs before anything destructive: a table or column the manifest does not
//! know about would otherwise be exported unscrubbed or silently dropped.

use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use crate::adapter::DbAdapter;
use crate::domain::{sorted_columns, DriftReport, Manifest};
use crate::error::Result;

/// Read the live schema, skipping ignored tables. Columns are sorted.
pub async fn live_schema(
    db: &dyn DbAdapter,
    ignore: &BTreeSet<String>,
) -> Result<BTreeMap<String, Vec<String>>> {
    let mut schema = BTreeMap::new();

    for table in db.list_tables().await? {
        if ignore.contains(&table) {
            debug!(table = %table, "Ignoring table");
            continue;
        }
        let columns = db.list_columns(&table).await?;
        schema.insert(table, sorted_columns(columns));
    }

    Ok(schema)
}

fn lowercase_set(columns: &[String]) -> BTreeSet<String> {
    columns.iter().map(|c| c.to_ascii_lowercase()).collect()
}

/// Columns of `left` missing from `right`, compared case-insensitively
fn column_difference(left: &[String], right: &[String]) -> Vec<String> {
    let right = lowercase_set(right);
    left.iter()
        .filter(|c| !right.contains(&c.to_ascii_lowercase()))
        .cloned()
        .collect()
}

/// Compare a live schema with the manifest's expectations
pub fn compare_schema(
    live: &BTreeMap<String, Vec<String>>,
    manifest: &Manifest,
    env: &str,
) -> DriftReport {
    let expected = manifest.comparison_map();
    let mut detail = BTreeMap::new();
    let mut missing = BTreeMap::new();

    for (table, live_columns) in live {
        match expected.get(table) {
            None => {
                detail.insert(table.clone(), live_columns.clone());
            }
            Some(expected_columns) => {
                let extra = column_difference(live_columns, expected_columns);
                if !extra.is_empty() {
                    detail.insert(table.clone(), extra);
                }
                let absent = column_difference(expected_columns, live_columns);
                if !absent.is_empty() {
                    missing.insert(table.clone(), absent);
                }
            }
        }
    }

    for (table, expected_columns) in &expected {
        if !live.contains_key(table) {
            missing.insert(table.clone(), expected_columns.clone());
        }
    }

    if detail.is_empty() && missing.is_empty() {
        return DriftReport::passed();
    }

    let mut error = format!(
        "Schema of the {} database does not match the sanitization config.",
        env
    );
    if !detail.is_empty() {
        error.push_str(&format!(
            "\n Unknown tables or columns: {}",
            format_tables(&detail)
        ));
    }
    if !missing.is_empty() {
        error.push_str(&format!(
            "\n Configured but not found: {}",
            format_tables(&missing)
        ));
    }
    error.push_str("\n Update the sanitization config before exporting.");

    DriftReport {
        pass: false,
        error: Some(error),
        detail,
        missing,
    }
}

fn format_tables(tables: &BTreeMap<String, Vec<String>>) -> String {
    tables
        .iter()
        .map(|(table, columns)| format!("{} [{}]", table, columns.join(", ")))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Check the live database for drift against the manifest
pub async fn check_drift(
    db: &dyn DbAdapter,
    manifest: &Manifest,
    ignore: &BTreeSet<String>,
    env: &str,
) -> Result<DriftReport> {
    info!(database = %db.database_name(), "Checking schema against sanitization config");
    let live = live_schema(db, ignore).await?;
    let report = compare_schema(&live, manifest, env);
    if report.pass {
        info!("No schema drift detected");
    }
    Ok(report)
}
