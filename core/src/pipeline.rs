//! Sanitize-and-export orchestration
//!
//! Stages run strictly in sequence: drift check, clone, truncate/scrub,
//! dump, compress, upload. Cancellation is honored between stages only.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::adapter::{DbAdapter, DbConnector, DumpTool, MySqlConnector, MysqlDumpTool};
use crate::cloner::{clone_database, drop_stale_clones};
use crate::config::Settings;
use crate::domain::{skips_sanitization, DriftReport, Manifest, RunId, SnapshotKey};
use crate::drift::check_drift;
use crate::error::{CoreError, Result};
use crate::export::{compress, export_to_file, remove_files, DumpArtifact};
use crate::hooks::{HookRegistry, TableHook};
use crate::processor::{process_tables, replacement_rng};
use crate::storage::{S3ObjectStore, SnapshotStore};

/// Advisory lock serializing runs against one primary database
pub fn run_lock_name(primary_db: &str) -> String {
    format!("snapscrub:{}", primary_db)
}

/// How a `sanitize_and_export` run ended without error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    /// The live schema disagrees with the manifest; nothing was touched
    DriftDetected(DriftReport),
    /// Snapshot stored remotely
    Uploaded(SnapshotKey),
    /// Uploads are not configured; the local snapshot was deleted
    Discarded,
}

/// Everything a pipeline entry point works with
pub struct PipelineContext {
    pub settings: Settings,
    pub primary: Arc<dyn DbAdapter>,
    pub connector: Arc<dyn DbConnector>,
    pub dump_tool: Arc<dyn DumpTool>,
    pub store: Option<SnapshotStore>,
    pub hooks: HookRegistry,
    pub cancel: CancellationToken,
}

impl PipelineContext {
    /// Context over explicit collaborators. Hooks come from
    /// `custom_sanitization_hooks`; no snapshot store is attached.
    pub fn new(
        settings: Settings,
        primary: Arc<dyn DbAdapter>,
        connector: Arc<dyn DbConnector>,
        dump_tool: Arc<dyn DumpTool>,
    ) -> Self {
        let hooks = HookRegistry::from_statements(&settings.custom_sanitization_hooks);
        Self {
            settings,
            primary,
            connector,
            dump_tool,
            store: None,
            hooks,
            cancel: CancellationToken::new(),
        }
    }

    /// Connect to MySQL and S3 as configured
    pub async fn connect(settings: Settings) -> Result<Self> {
        let connector: Arc<dyn DbConnector> = Arc::new(MySqlConnector);
        let primary = connector.connect(&settings.db).await?;
        let dump_tool = Arc::new(MysqlDumpTool::new(settings.process_timeout()));

        let store = S3ObjectStore::from_settings(&settings)?
            .map(|s3| SnapshotStore::new(Arc::new(s3), &settings.app_name));
        if store.is_none() {
            info!("S3 credentials not configured, snapshots stay local");
        }

        Ok(Self::new(settings, primary, connector, dump_tool).with_store(store))
    }

    pub fn with_store(mut self, store: Option<SnapshotStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Add or replace the hook for `table`
    pub fn register_hook(mut self, table: &str, hook: Arc<dyn TableHook>) -> Self {
        self.hooks.register(table, hook);
        self
    }

    /// Fail with `Cancelled` if cancellation was requested
    pub fn checkpoint(&self, stage: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            warn!("Cancellation requested, stopping before {}", stage);
            return Err(CoreError::Cancelled(stage.to_string()));
        }
        Ok(())
    }

    /// Release the primary connection
    pub async fn close(&self) {
        self.primary.close().await;
    }
}

/// Produce a scrubbed snapshot of the primary database and store it.
///
/// Drift is reported, not raised. Past the drift gate the run holds the run
/// lock until its snapshot is stored or discarded, so a rejected run never
/// touches the dump files of the one in progress. Any other failure removes
/// the run's dump files and is returned.
pub async fn sanitize_and_export(ctx: &PipelineContext) -> Result<ExportOutcome> {
    let settings = &ctx.settings;
    let run_id = RunId::new();
    info!(
        run_id = %run_id,
        env = %settings.env,
        database = %settings.db.database,
        "Starting sanitize and export"
    );

    ctx.checkpoint("drift check")?;
    let manifest = settings.manifest();
    let report = check_drift(
        ctx.primary.as_ref(),
        &manifest,
        &settings.tables_to_ignore,
        &settings.env,
    )
    .await?;
    if !report.pass {
        error!(
            tables = ?report.drifted_tables(),
            "{}",
            report.error.as_deref().unwrap_or("Schema drift detected")
        );
        return Ok(ExportOutcome::DriftDetected(report));
    }

    let lock = run_lock_name(&settings.db.database);
    if !ctx.primary.try_advisory_lock(&lock).await? {
        warn!(run_id = %run_id, "Another run holds {}, not starting", lock);
        return Err(CoreError::RunInProgress(lock));
    }

    let result = export_holding_lock(ctx, &manifest, &run_id).await;

    if let Err(e) = ctx.primary.release_advisory_lock(&lock).await {
        warn!("Failed to release lock {}: {}", lock, e);
    }
    result
}

async fn export_holding_lock(
    ctx: &PipelineContext,
    manifest: &Manifest,
    run_id: &RunId,
) -> Result<ExportOutcome> {
    let artifact = DumpArtifact::create(&ctx.settings.tmp_dir()).await?;
    match produce_snapshot(ctx, manifest, &artifact, run_id).await {
        Ok(outcome) => {
            info!(run_id = %run_id, "Sanitize and export complete");
            Ok(outcome)
        }
        Err(e) => {
            error!(run_id = %run_id, "Sanitize and export failed: {}", e);
            artifact.cleanup().await;
            Err(e)
        }
    }
}

async fn produce_snapshot(
    ctx: &PipelineContext,
    manifest: &Manifest,
    artifact: &DumpArtifact,
    run_id: &RunId,
) -> Result<ExportOutcome> {
    let settings = &ctx.settings;

    if skips_sanitization(&settings.env) {
        info!(
            "Skipping sanitization for {}, dumping {} directly",
            settings.env, settings.db.database
        );
        ctx.checkpoint("export")?;
        export_to_file(
            ctx.dump_tool.as_ref(),
            &settings.db,
            &settings.db.database,
            &artifact.dump_path,
        )
        .await?;
    } else {
        export_from_clone(ctx, manifest, artifact, run_id).await?;
    }

    ctx.checkpoint("compression")?;
    let compressed = compress(&artifact.dump_path).await?;

    ctx.checkpoint("upload")?;
    match &ctx.store {
        Some(store) => {
            let key = store.upload(&settings.env, &compressed).await?;
            info!(key = %key, "Snapshot uploaded");
            Ok(ExportOutcome::Uploaded(key))
        }
        None => {
            info!("Uploads not configured, discarding {}", compressed.display());
            remove_files(&[&compressed]).await;
            Ok(ExportOutcome::Discarded)
        }
    }
}

async fn export_from_clone(
    ctx: &PipelineContext,
    manifest: &Manifest,
    artifact: &DumpArtifact,
    run_id: &RunId,
) -> Result<()> {
    let settings = &ctx.settings;
    let primary = ctx.primary.as_ref();

    ctx.checkpoint("clone")?;
    let dropped = drop_stale_clones(primary, &settings.db.database).await?;
    if dropped > 0 {
        info!("Dropped {} temp DBs left by earlier runs", dropped);
    }
    let clone = clone_database(
        primary,
        ctx.connector.as_ref(),
        ctx.dump_tool.as_ref(),
        &settings.db,
        manifest,
        run_id,
        &settings.tmp_dir(),
    )
    .await?;

    let processed = async {
        ctx.checkpoint("table processing")?;
        let mut rng = replacement_rng(settings.sanitization_seed);
        process_tables(
            clone.adapter(),
            manifest,
            &settings.sanitization_column_rules,
            &ctx.hooks,
            &mut rng,
        )
        .await
    }
    .await;

    match processed {
        Ok(report) => {
            info!(
                truncated = report.truncated.len(),
                sanitized = report.sanitized.len(),
                "Tables processed"
            );
        }
        Err(e) => {
            let keep = settings.keep_clone_on_failure && !matches!(e, CoreError::Cancelled(_));
            if keep {
                clone.release().await;
            } else {
                clone.destroy(primary).await;
            }
            return Err(e);
        }
    }

    let exported = match ctx.checkpoint("export") {
        Ok(()) => {
            export_to_file(
                ctx.dump_tool.as_ref(),
                &clone.config,
                &clone.name,
                &artifact.dump_path,
            )
            .await
        }
        Err(e) => Err(e),
    };
    clone.destroy(primary).await;
    exported
}
