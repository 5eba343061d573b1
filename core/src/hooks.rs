//! Per-table custom sanitization hooks

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::info;

use crate::adapter::DbAdapter;
use crate::error::{CoreError, Result};

/// Extra processing for one table, run after its columns are scrubbed
#[async_trait]
pub trait TableHook: Send + Sync {
    async fn run(&self, table: &str, db: &dyn DbAdapter) -> Result<()>;
}

/// Hook made of SQL statements executed in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlHook {
    statements: Vec<String>,
}

impl SqlHook {
    pub fn new(statements: Vec<String>) -> Self {
        Self { statements }
    }
}

#[async_trait]
impl TableHook for SqlHook {
    async fn run(&self, table: &str, db: &dyn DbAdapter) -> Result<()> {
        for statement in &self.statements {
            let affected = db.execute(statement).await.map_err(|e| CoreError::Hook {
                table: table.to_string(),
                message: e.to_string(),
            })?;
            info!(table = %table, affected, "Custom statement: {}", statement);
        }
        Ok(())
    }
}

/// Table name -> hook
#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: HashMap<String, Arc<dyn TableHook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One `SqlHook` per configured table
    pub fn from_statements(statements: &BTreeMap<String, Vec<String>>) -> Self {
        let mut registry = Self::new();
        for (table, sql) in statements {
            registry.register(table, Arc::new(SqlHook::new(sql.clone())));
        }
        registry
    }

    /// Register a hook, replacing any previous one for the table
    pub fn register(&mut self, table: &str, hook: Arc<dyn TableHook>) {
        self.hooks.insert(table.to_string(), hook);
    }

    pub fn get(&self, table: &str) -> Option<&Arc<dyn TableHook>> {
        self.hooks.get(table)
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}
