//! Database collaborator abstraction
//!
//! `DbAdapter` covers statement-level work on one database, `DbConnector`
//! opens adapters, and `DumpTool` wraps the engine's bulk dump/restore
//! facility.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use crate::domain::ConnectionConfig;
use crate::error::Result;
use crate::process::ProcessOutcome;

pub mod mysql;
pub mod mysqldump;

pub use mysql::{MySqlAdapter, MySqlConnector};
pub use mysqldump::MysqlDumpTool;

/// Statement-level access to one database
#[async_trait]
pub trait DbAdapter: Send + Sync {
    /// Name of the database this adapter is bound to
    fn database_name(&self) -> &str;

    /// List all base tables
    async fn list_tables(&self) -> Result<Vec<String>>;

    /// List every database on the server
    async fn list_databases(&self) -> Result<Vec<String>>;

    /// List column names of a table in ordinal order
    async fn list_columns(&self, table: &str) -> Result<Vec<String>>;

    /// Run an arbitrary statement, returning affected rows
    async fn execute(&self, statement: &str) -> Result<u64>;

    /// Distinct values of a column as text; `None` stands for SQL NULL
    async fn distinct_values(&self, table: &str, column: &str) -> Result<Vec<Option<String>>>;

    /// Set `column` to `replacement` wherever it currently equals `original`
    async fn replace_value(
        &self,
        table: &str,
        column: &str,
        original: &str,
        replacement: &str,
    ) -> Result<u64>;

    /// Remove all rows, keep the schema, reset auto-increment
    async fn truncate_table(&self, table: &str) -> Result<()>;

    async fn count_rows(&self, table: &str) -> Result<i64>;

    /// Create a database on the same server
    async fn create_database(&self, db_name: &str) -> Result<()>;

    /// Drop a database on the same server if it exists
    async fn drop_database(&self, db_name: &str) -> Result<()>;

    /// Take a server-wide advisory lock without waiting
    async fn try_advisory_lock(&self, name: &str) -> Result<bool>;

    async fn release_advisory_lock(&self, name: &str) -> Result<()>;

    /// Close all connections held by this adapter
    async fn close(&self);
}

/// Opens adapters for connection settings
#[async_trait]
pub trait DbConnector: Send + Sync {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn DbAdapter>>;
}

/// What a dump contains
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DumpScope {
    /// Every table, schema and rows
    Full,
    /// Listed tables, schema and rows
    Tables(Vec<String>),
    /// Listed tables, schema only
    SchemaOnly(Vec<String>),
}

/// The engine's bulk dump/restore facility
#[async_trait]
pub trait DumpTool: Send + Sync {
    /// Dump `config.database` into `path`, appending when `append` is set
    async fn dump_to_file(
        &self,
        config: &ConnectionConfig,
        scope: &DumpScope,
        path: &Path,
        append: bool,
    ) -> Result<ProcessOutcome>;

    /// Load a plain dump file into `config.database`
    async fn restore_from_file(&self, config: &ConnectionConfig, path: &Path)
        -> Result<ProcessOutcome>;
}
