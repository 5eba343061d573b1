//! Truncation and column-level scrubbing of the working copy

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{RngCore, SeedableRng};
use serde::Serialize;
use tracing::{debug, info};

use crate::adapter::DbAdapter;
use crate::domain::{ColumnRules, Manifest};
use crate::error::{CoreError, Result};
use crate::hooks::HookRegistry;

/// Random source for replacement picks; seeded runs are reproducible
pub fn replacement_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// What happened to one sanitized table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableSanitization {
    pub table: String,
    /// Columns that had a replacement rule
    pub columns: Vec<String>,
    /// Rows touched by replacement updates
    pub rows_updated: u64,
    pub hook_ran: bool,
}

/// Summary of a `process_tables` pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessReport {
    pub truncated: Vec<String>,
    pub sanitized: Vec<TableSanitization>,
}

/// Scrub one table.
///
/// Every distinct value of a ruled column gets its own random pick from the
/// pool, so rows sharing an original value are rewritten together while
/// different originals map independently. NULLs are left alone. The table's
/// hook, if any, runs afterwards.
pub async fn sanitize_table(
    db: &dyn DbAdapter,
    table: &str,
    rules: &ColumnRules,
    hooks: &HookRegistry,
    rng: &mut (dyn RngCore + Send),
) -> Result<TableSanitization> {
    let mut report = TableSanitization {
        table: table.to_string(),
        ..Default::default()
    };

    for column in db.list_columns(table).await? {
        let Some(pool) = rules.replacements(&column) else {
            continue;
        };

        let originals = db.distinct_values(table, &column).await?;
        debug!(table = %table, column = %column, distinct = originals.len(), "Scrubbing column");

        for original in originals.iter().flatten() {
            let replacement = pool.choose(rng).ok_or_else(|| {
                CoreError::Config(format!("No replacement values for column {}", column))
            })?;
            report.rows_updated += db
                .replace_value(table, &column, original, replacement)
                .await?;
        }
        report.columns.push(column);
    }

    if let Some(hook) = hooks.get(table) {
        info!(table = %table, "Running custom sanitization");
        hook.run(table, db).await?;
        report.hook_ran = true;
    }

    Ok(report)
}

/// Truncate every truncate-table, then scrub every sanitize-table.
///
/// The first failing statement aborts the pass; the working copy is left as
/// it is.
pub async fn process_tables(
    db: &dyn DbAdapter,
    manifest: &Manifest,
    rules: &ColumnRules,
    hooks: &HookRegistry,
    rng: &mut (dyn RngCore + Send),
) -> Result<ProcessReport> {
    let mut report = ProcessReport::default();

    info!("Processing tables to truncate");
    for table in manifest.tables_to_truncate.keys() {
        info!(table = %table, "Truncating");
        db.truncate_table(table).await?;
        report.truncated.push(table.clone());
    }

    info!("Processing tables to sanitize");
    for table in manifest.tables_to_sanitize.keys() {
        info!(table = %table, "Sanitizing");
        let sanitized = sanitize_table(db, table, rules, hooks, rng).await?;
        report.sanitized.push(sanitized);
    }

    Ok(report)
}
