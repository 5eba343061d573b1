//! In-memory collaborators for unit tests

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::adapter::{DbAdapter, DbConnector, DumpScope, DumpTool};
use crate::domain::ConnectionConfig;
use crate::error::{CoreError, Result};
use crate::process::ProcessOutcome;
use crate::sql::SqlGenerator;
use crate::storage::ObjectStore;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct MemTable {
    columns: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

impl MemTable {
    fn column_index(&self, column: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .ok_or_else(|| CoreError::Internal(format!("Unknown column '{}'", column)))
    }
}

type Database = BTreeMap<String, MemTable>;

#[derive(Default)]
struct ServerState {
    databases: BTreeMap<String, Database>,
    locks: BTreeSet<String>,
    statements: Vec<String>,
    fail_on: Option<String>,
    closed: BTreeSet<String>,
}

/// A fake database server shared by every adapter handed out
#[derive(Clone, Default)]
pub struct MemoryServer {
    state: Arc<Mutex<ServerState>>,
}

impl MemoryServer {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap()
    }

    /// Create (or replace) a table, creating its database on demand
    pub fn create_table(&self, db: &str, table: &str, columns: &[&str], rows: &[&[&str]]) {
        let table_data = MemTable {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: rows
                .iter()
                .map(|row| row.iter().map(|v| Some(v.to_string())).collect())
                .collect(),
        };
        self.state()
            .databases
            .entry(db.to_string())
            .or_default()
            .insert(table.to_string(), table_data);
    }

    pub fn create_database(&self, db: &str) {
        self.state().databases.entry(db.to_string()).or_default();
    }

    pub fn column_values(&self, db: &str, table: &str, column: &str) -> Vec<Option<String>> {
        let state = self.state();
        let table = &state.databases[db][table];
        let idx = table.column_index(column).unwrap();
        table.rows.iter().map(|row| row[idx].clone()).collect()
    }

    pub fn tables(&self, db: &str) -> Vec<String> {
        self.state()
            .databases
            .get(db)
            .map(|tables| tables.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Make every recorded statement containing `fragment` fail
    pub fn fail_statements_containing(&self, fragment: &str) {
        self.state().fail_on = Some(fragment.to_string());
    }

    pub fn statements(&self) -> Vec<String> {
        self.state().statements.clone()
    }

    pub fn database_exists(&self, db: &str) -> bool {
        self.state().databases.contains_key(db)
    }

    pub fn is_closed(&self, db: &str) -> bool {
        self.state().closed.contains(db)
    }

    pub fn lock_held(&self, name: &str) -> bool {
        self.state().locks.contains(name)
    }

    pub fn adapter(&self, db: &str) -> MemoryAdapter {
        MemoryAdapter {
            server: self.clone(),
            database: db.to_string(),
        }
    }

    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            server: self.clone(),
        }
    }

    /// Log a mutating statement, failing it if it matches the fail pattern
    fn record(&self, statement: String) -> Result<()> {
        let mut state = self.state();
        let fails = state
            .fail_on
            .as_deref()
            .is_some_and(|fragment| statement.contains(fragment));
        state.statements.push(statement.clone());
        if fails {
            return Err(CoreError::Internal(format!(
                "Statement rejected: {}",
                statement
            )));
        }
        Ok(())
    }

    fn with_table<T>(
        &self,
        db: &str,
        table: &str,
        f: impl FnOnce(&mut MemTable) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.state();
        let database = state
            .databases
            .get_mut(db)
            .ok_or_else(|| CoreError::Internal(format!("Unknown database '{}'", db)))?;
        let table = database
            .get_mut(table)
            .ok_or_else(|| CoreError::Internal(format!("Table '{}.{}' doesn't exist", db, table)))?;
        f(table)
    }
}

/// Adapter bound to one database of a `MemoryServer`
pub struct MemoryAdapter {
    server: MemoryServer,
    database: String,
}

impl MemoryAdapter {
    /// `DELETE FROM t` with an optional `WHERE col < n`
    fn delete(&self, statement: &str) -> Result<u64> {
        let re = Regex::new(
            r"(?i)^\s*DELETE\s+FROM\s+`?(\w+)`?(?:\s+WHERE\s+`?(\w+)`?\s*<\s*(-?\d+))?\s*;?\s*$",
        )
        .unwrap();
        let Some(caps) = re.captures(statement) else {
            return Ok(0);
        };
        let table = caps[1].to_string();
        let filter = match (caps.get(2), caps.get(3)) {
            (Some(column), Some(limit)) => {
                Some((column.as_str().to_string(), limit.as_str().parse::<i64>().unwrap()))
            }
            _ => None,
        };

        self.server.with_table(&self.database, &table, |t| {
            let before = t.rows.len();
            match filter {
                Some((column, limit)) => {
                    let idx = t.column_index(&column)?;
                    t.rows.retain(|row| {
                        !row[idx]
                            .as_deref()
                            .and_then(|v| v.parse::<i64>().ok())
                            .is_some_and(|v| v < limit)
                    });
                }
                None => t.rows.clear(),
            }
            Ok((before - t.rows.len()) as u64)
        })
    }
}

#[async_trait]
impl DbAdapter for MemoryAdapter {
    fn database_name(&self) -> &str {
        &self.database
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        if !self.server.database_exists(&self.database) {
            return Err(CoreError::Internal(format!("Unknown database '{}'", self.database)));
        }
        Ok(self.server.tables(&self.database))
    }

    async fn list_databases(&self) -> Result<Vec<String>> {
        Ok(self.server.state().databases.keys().cloned().collect())
    }

    async fn list_columns(&self, table: &str) -> Result<Vec<String>> {
        self.server
            .with_table(&self.database, table, |t| Ok(t.columns.clone()))
    }

    async fn execute(&self, statement: &str) -> Result<u64> {
        self.server.record(statement.to_string())?;
        self.delete(statement)
    }

    async fn distinct_values(&self, table: &str, column: &str) -> Result<Vec<Option<String>>> {
        self.server.with_table(&self.database, table, |t| {
            let idx = t.column_index(column)?;
            let mut values: Vec<Option<String>> = Vec::new();
            for row in &t.rows {
                if !values.contains(&row[idx]) {
                    values.push(row[idx].clone());
                }
            }
            Ok(values)
        })
    }

    async fn replace_value(
        &self,
        table: &str,
        column: &str,
        original: &str,
        replacement: &str,
    ) -> Result<u64> {
        self.server.record(SqlGenerator::replace_value(table, column))?;
        self.server.with_table(&self.database, table, |t| {
            let idx = t.column_index(column)?;
            let mut updated = 0;
            for row in t.rows.iter_mut() {
                if row[idx].as_deref() == Some(original) {
                    row[idx] = Some(replacement.to_string());
                    updated += 1;
                }
            }
            Ok(updated)
        })
    }

    async fn truncate_table(&self, table: &str) -> Result<()> {
        self.server.record(SqlGenerator::truncate_table(table))?;
        self.server.with_table(&self.database, table, |t| {
            t.rows.clear();
            Ok(())
        })
    }

    async fn count_rows(&self, table: &str) -> Result<i64> {
        self.server
            .with_table(&self.database, table, |t| Ok(t.rows.len() as i64))
    }

    async fn create_database(&self, db_name: &str) -> Result<()> {
        self.server.record(SqlGenerator::create_database(db_name))?;
        let mut state = self.server.state();
        if state.databases.contains_key(db_name) {
            return Err(CoreError::Internal(format!(
                "Can't create database '{}'; database exists",
                db_name
            )));
        }
        state.databases.insert(db_name.to_string(), Database::new());
        state.closed.remove(db_name);
        Ok(())
    }

    async fn drop_database(&self, db_name: &str) -> Result<()> {
        self.server
            .record(SqlGenerator::drop_database_if_exists(db_name))?;
        self.server.state().databases.remove(db_name);
        Ok(())
    }

    async fn try_advisory_lock(&self, name: &str) -> Result<bool> {
        Ok(self.server.state().locks.insert(name.to_string()))
    }

    async fn release_advisory_lock(&self, name: &str) -> Result<()> {
        self.server.state().locks.remove(name);
        Ok(())
    }

    async fn close(&self) {
        self.server.state().closed.insert(self.database.clone());
    }
}

/// Connects to databases of a `MemoryServer`; unknown databases fail
pub struct MemoryConnector {
    server: MemoryServer,
}

#[async_trait]
impl DbConnector for MemoryConnector {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn DbAdapter>> {
        if !self.server.database_exists(&config.database) {
            return Err(CoreError::Internal(format!(
                "Unknown database '{}'",
                config.database
            )));
        }
        Ok(Arc::new(self.server.adapter(&config.database)))
    }
}

#[derive(Serialize, Deserialize)]
struct DumpedTable {
    name: String,
    table: MemTable,
}

/// Dump tool writing JSON lines, one table per line
pub struct MemoryDumpTool {
    server: MemoryServer,
    failing: Option<String>,
}

impl MemoryDumpTool {
    pub fn new(server: MemoryServer) -> Self {
        Self {
            server,
            failing: None,
        }
    }

    /// Make `mysqldump` or `mysql` invocations exit non-zero
    pub fn failing(mut self, program: &str) -> Self {
        self.failing = Some(program.to_string());
        self
    }

    fn fails(&self, program: &str) -> bool {
        self.failing.as_deref() == Some(program)
    }
}

#[async_trait]
impl DumpTool for MemoryDumpTool {
    async fn dump_to_file(
        &self,
        config: &ConnectionConfig,
        scope: &DumpScope,
        path: &Path,
        append: bool,
    ) -> Result<ProcessOutcome> {
        if self.fails("mysqldump") {
            return Ok(ProcessOutcome::failed("mysqldump", 2, "Got error: 1045: Access denied"));
        }

        let lines = {
            let state = self.server.state();
            let Some(database) = state.databases.get(&config.database) else {
                return Ok(ProcessOutcome::failed(
                    "mysqldump",
                    2,
                    &format!("Got error: 1049: Unknown database '{}'", config.database),
                ));
            };

            let (selected, schema_only): (Vec<String>, bool) = match scope {
                DumpScope::Full => (database.keys().cloned().collect(), false),
                DumpScope::Tables(tables) => (tables.clone(), false),
                DumpScope::SchemaOnly(tables) => (tables.clone(), true),
            };

            let mut lines = String::new();
            for name in selected {
                let Some(table) = database.get(&name) else {
                    return Ok(ProcessOutcome::failed(
                        "mysqldump",
                        6,
                        &format!("Couldn't find table: \"{}\"", name),
                    ));
                };
                let mut table = table.clone();
                if schema_only {
                    table.rows.clear();
                }
                let line = serde_json::to_string(&DumpedTable { name, table })
                    .map_err(|e| CoreError::Internal(e.to_string()))?;
                lines.push_str(&line);
                lines.push('\n');
            }
            lines
        };

        let mut contents = if append {
            tokio::fs::read_to_string(path).await.unwrap_or_default()
        } else {
            String::new()
        };
        contents.push_str(&lines);
        tokio::fs::write(path, contents).await?;

        Ok(ProcessOutcome::succeeded("mysqldump"))
    }

    async fn restore_from_file(
        &self,
        config: &ConnectionConfig,
        path: &Path,
    ) -> Result<ProcessOutcome> {
        if self.fails("mysql") {
            return Ok(ProcessOutcome::failed("mysql", 1, "ERROR 2013: Lost connection"));
        }

        let contents = tokio::fs::read_to_string(path).await?;
        let mut state = self.server.state();
        let Some(database) = state.databases.get_mut(&config.database) else {
            return Ok(ProcessOutcome::failed(
                "mysql",
                1,
                &format!("ERROR 1049 (42000): Unknown database '{}'", config.database),
            ));
        };

        for line in contents.lines().filter(|l| !l.trim().is_empty()) {
            let Ok(dumped) = serde_json::from_str::<DumpedTable>(line) else {
                return Ok(ProcessOutcome::failed(
                    "mysql",
                    1,
                    "ERROR 1064 (42000): You have an error in your SQL syntax",
                ));
            };
            database.insert(dumped.name, dumped.table);
        }

        Ok(ProcessOutcome::succeeded("mysql"))
    }
}

/// Object store backed by a map; presigned links point at `base_url`
pub struct MemoryObjectStore {
    base_url: String,
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    reject_uploads: AtomicBool,
}

impl MemoryObjectStore {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            objects: Mutex::new(BTreeMap::new()),
            reject_uploads: AtomicBool::new(false),
        }
    }

    pub fn insert(&self, key: &str, body: Vec<u8>) {
        self.objects.lock().unwrap().insert(key.to_string(), body);
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn reject_uploads(&self) {
        self.reject_uploads.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn location(&self) -> String {
        "memory://snapshots".to_string()
    }

    async fn put_object(&self, key: &str, path: &Path) -> Result<()> {
        if self.reject_uploads.load(Ordering::SeqCst) {
            return Err(CoreError::Upload(format!("Upload of {} rejected", key)));
        }
        let body = tokio::fs::read(path).await?;
        self.insert(key, body);
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .keys()
            .into_iter()
            .filter(|key| key.starts_with(prefix))
            .collect())
    }

    async fn presigned_get_url(&self, key: &str, expires_in: Duration) -> Result<String> {
        Ok(format!(
            "{}/{}?X-Amz-Expires={}",
            self.base_url,
            key,
            expires_in.as_secs()
        ))
    }
}
