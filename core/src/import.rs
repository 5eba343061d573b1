//! Restoring a stored snapshot into the local database

use tracing::{info, warn};

use crate::adapter::DumpScope;
use crate::error::{CoreError, Result};
use crate::export::{decompress, gz_path, remove_files, DUMP_FILE_NAME, LOCAL_BACKUP_FILE_NAME};
use crate::pipeline::PipelineContext;

/// Environment imported from when none is named
pub const DEFAULT_IMPORT_ENV: &str = "production";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    Restored { env: String, timestamp: String },
    /// Nothing to import; the local database was not touched
    NoSnapshot,
}

/// Replace the local database with a snapshot.
///
/// `env` defaults to production and `timestamp` to the latest snapshot. The
/// local database is dumped to `tmp/local_data.dump` before anything is
/// dropped. A failed restore leaves the database half-loaded; the backup is
/// the way back.
pub async fn import_snapshot(
    ctx: &PipelineContext,
    env: Option<&str>,
    timestamp: Option<&str>,
) -> Result<ImportOutcome> {
    let settings = &ctx.settings;
    let env = env.unwrap_or(DEFAULT_IMPORT_ENV);
    let store = ctx.store.as_ref().ok_or_else(|| {
        CoreError::Config("Importing needs s3_bucket and AWS credentials".to_string())
    })?;

    ctx.checkpoint("snapshot lookup")?;
    let timestamp = match timestamp {
        Some(timestamp) => timestamp.to_string(),
        None => match store.resolve_latest(env).await? {
            Some(latest) => latest,
            None => {
                warn!("No snapshots found for {}, aborting import", env);
                return Ok(ImportOutcome::NoSnapshot);
            }
        },
    };

    let database = &settings.db.database;
    warn!(
        database = %database,
        "Importing {} snapshot {}. The local database will be dumped and wiped",
        env,
        timestamp
    );

    let tmp_dir = settings.tmp_dir();
    tokio::fs::create_dir_all(&tmp_dir).await?;
    let backup_path = tmp_dir.join(LOCAL_BACKUP_FILE_NAME);
    let dump_path = tmp_dir.join(DUMP_FILE_NAME);
    let compressed_path = gz_path(&dump_path);

    ctx.checkpoint("backup")?;
    info!("Backing up {} to {}", database, backup_path.display());
    ctx.dump_tool
        .dump_to_file(&settings.db, &DumpScope::Full, &backup_path, false)
        .await?
        .check(CoreError::Backup)?;

    ctx.checkpoint("download")?;
    match store.fetch(env, &timestamp, &compressed_path).await {
        Ok(_) => {}
        Err(CoreError::SnapshotNotFound(prefix)) => {
            warn!("Snapshot {} not found, aborting import", prefix);
            return Ok(ImportOutcome::NoSnapshot);
        }
        Err(e) => return Err(e),
    }
    decompress(&compressed_path, &dump_path).await?;

    ctx.checkpoint("restore")?;
    info!("Recreating {}", database);
    ctx.primary.drop_database(database).await?;
    ctx.primary.create_database(database).await?;

    info!("Restoring {} from {}", database, dump_path.display());
    ctx.dump_tool
        .restore_from_file(&settings.db, &dump_path)
        .await?
        .check(CoreError::Restore)?;

    remove_files(&[&compressed_path, &dump_path]).await;
    info!(database = %database, "Import of {} snapshot {} complete", env, timestamp);

    Ok(ImportOutcome::Restored {
        env: env.to_string(),
        timestamp,
    })
}
