//! Ephemeral clone of the primary database

use regex::Regex;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::adapter::{DbAdapter, DbConnector, DumpScope, DumpTool};
use crate::domain::{ConnectionConfig, Manifest, RunId};
use crate::error::{CoreError, Result};
use crate::export::remove_files;

/// Name of the working copy for one run
pub fn clone_name(primary_db: &str, run_id: &RunId) -> String {
    format!("{}_copy_{}", primary_db, run_id.short())
}

/// Whether `candidate` is a working copy of `primary_db` from any run
pub fn is_clone_of(primary_db: &str, candidate: &str) -> bool {
    let pattern = format!(r"^{}_copy_[0-9a-f]{{8}}$", regex::escape(primary_db));
    Regex::new(&pattern).is_ok_and(|re| re.is_match(candidate))
}

/// Drop copies left behind by earlier runs. Only safe while the run lock
/// is held.
pub async fn drop_stale_clones(primary: &dyn DbAdapter, primary_db: &str) -> Result<usize> {
    let stale: Vec<String> = primary
        .list_databases()
        .await?
        .into_iter()
        .filter(|name| is_clone_of(primary_db, name))
        .collect();

    for name in &stale {
        info!("Dropping leftover temp DB {}", name);
        primary.drop_database(name).await?;
    }
    Ok(stale.len())
}

/// A run-scoped copy of the primary database and an open connection to it
pub struct EphemeralDatabase {
    pub name: String,
    pub config: ConnectionConfig,
    db: Arc<dyn DbAdapter>,
}

impl EphemeralDatabase {
    pub fn adapter(&self) -> &dyn DbAdapter {
        self.db.as_ref()
    }

    /// Close the connection and drop the database. Never fails; problems
    /// are logged.
    pub async fn destroy(self, primary: &dyn DbAdapter) {
        self.db.close().await;
        info!("Dropping {}", self.name);
        if let Err(e) = primary.drop_database(&self.name).await {
            warn!("Failed to drop {}: {}", self.name, e);
        }
    }

    /// Close the connection but keep the database for inspection
    pub async fn release(self) {
        self.db.close().await;
        warn!("Leaving {} in place for inspection", self.name);
    }
}

/// Copy one table set into the clone through an intermediate dump file
async fn copy_tables(
    tool: &dyn DumpTool,
    source: &ConnectionConfig,
    target: &ConnectionConfig,
    scope: DumpScope,
    scratch: &Path,
) -> Result<()> {
    let tables = match &scope {
        DumpScope::Tables(tables) | DumpScope::SchemaOnly(tables) => tables,
        DumpScope::Full => {
            return Err(CoreError::Internal(
                "Clones copy listed tables only".to_string(),
            ))
        }
    };
    // An empty table list would make mysqldump copy everything
    if tables.is_empty() {
        return Ok(());
    }

    let result = async {
        tool.dump_to_file(source, &scope, scratch, false)
            .await?
            .check(CoreError::Clone)?;
        tool.restore_from_file(target, scratch)
            .await?
            .check(CoreError::Clone)
    }
    .await;

    remove_files(&[scratch]).await;
    result
}

/// Create the working copy: rows for sanitize-tables, schema only for
/// truncate-tables, nothing else.
///
/// A partially built clone is dropped before the error is returned.
pub async fn clone_database(
    primary: &dyn DbAdapter,
    connector: &dyn DbConnector,
    tool: &dyn DumpTool,
    primary_config: &ConnectionConfig,
    manifest: &Manifest,
    run_id: &RunId,
    tmp_dir: &Path,
) -> Result<EphemeralDatabase> {
    let name = clone_name(&primary_config.database, run_id);
    let clone_config = primary_config.with_database(&name);

    info!("Deleting temp DB {} if it exists", name);
    primary.drop_database(&name).await?;
    info!("Creating temp DB {}", name);
    primary.create_database(&name).await?;

    tokio::fs::create_dir_all(tmp_dir).await?;
    let scratch = tmp_dir.join(format!("clone_{}.dump", run_id.short()));

    let copied = async {
        info!(
            "Copying {} tables with data into {}",
            manifest.tables_to_sanitize.len(),
            name
        );
        copy_tables(
            tool,
            primary_config,
            &clone_config,
            DumpScope::Tables(manifest.sanitize_tables()),
            &scratch,
        )
        .await?;

        info!(
            "Copying {} table schemas into {}",
            manifest.tables_to_truncate.len(),
            name
        );
        copy_tables(
            tool,
            primary_config,
            &clone_config,
            DumpScope::SchemaOnly(manifest.truncate_tables()),
            &scratch,
        )
        .await?;

        connector.connect(&clone_config).await
    }
    .await;

    match copied {
        Ok(db) => {
            info!("Temp DB {} created and populated", name);
            Ok(EphemeralDatabase {
                name,
                config: clone_config,
                db,
            })
        }
        Err(e) => {
            warn!("Cloning into {} failed, dropping it", name);
            if let Err(drop_err) = primary.drop_database(&name).await {
                warn!("Failed to drop {}: {}", name, drop_err);
            }
            Err(e)
        }
    }
}
