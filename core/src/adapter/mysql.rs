//! MySQL adapter implementation

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use sqlx::pool::PoolConnection;
use sqlx::{Executor, MySql, MySqlPool, Row};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::adapter::{DbAdapter, DbConnector};
use crate::domain::ConnectionConfig;
use crate::error::{CoreError, Result};
use crate::sql::SqlGenerator;

/// Adapter identifiers accepted in `db.adapter`
const SUPPORTED_ADAPTERS: [&str; 2] = ["mysql", "mysql2"];

/// Pool size per adapter. Scrubbing is sequential; one extra connection is
/// reserved for the advisory lock.
const MAX_CONNECTIONS: u32 = 3;

/// MySQL database adapter
pub struct MySqlAdapter {
    /// Connection pool bound to `database`
    pool: MySqlPool,
    database: String,
    /// Connection holding the advisory lock; MySQL locks are per-session
    lock_conn: Mutex<Option<PoolConnection<MySql>>>,
}

impl MySqlAdapter {
    pub fn new(pool: MySqlPool, database: String) -> Self {
        Self {
            pool,
            database,
            lock_conn: Mutex::new(None),
        }
    }

    /// Build connect options from connection settings
    fn connect_options(config: &ConnectionConfig) -> MySqlConnectOptions {
        let mut options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.username)
            .database(&config.database);

        if let Some(ref password) = config.password {
            options = options.password(password);
        }

        options
    }

    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        if !SUPPORTED_ADAPTERS.contains(&config.adapter.as_str()) {
            return Err(CoreError::Config(format!(
                "Unsupported database adapter: {}",
                config.adapter
            )));
        }

        let pool = MySqlPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(Self::connect_options(config))
            .await?;

        info!(database = %config.database, host = %config.host, "Connected to MySQL");
        Ok(Self::new(pool, config.database.clone()))
    }
}

#[async_trait]
impl DbAdapter for MySqlAdapter {
    fn database_name(&self) -> &str {
        &self.database
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(SqlGenerator::list_tables())
            .bind(&self.database)
            .fetch_all(&self.pool)
            .await?;

        let names = rows
            .iter()
            .map(|row| row.try_get::<String, _>("name"))
            .collect::<std::result::Result<Vec<_>, sqlx::Error>>()?;
        Ok(names)
    }

    async fn list_databases(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(SqlGenerator::list_databases())
            .fetch_all(&self.pool)
            .await?;

        let names = rows
            .iter()
            .map(|row| row.try_get::<String, _>("name"))
            .collect::<std::result::Result<Vec<_>, sqlx::Error>>()?;
        Ok(names)
    }

    async fn list_columns(&self, table: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(SqlGenerator::list_columns())
            .bind(&self.database)
            .bind(table)
            .fetch_all(&self.pool)
            .await?;

        let names = rows
            .iter()
            .map(|row| row.try_get::<String, _>("name"))
            .collect::<std::result::Result<Vec<_>, sqlx::Error>>()?;
        Ok(names)
    }

    async fn execute(&self, statement: &str) -> Result<u64> {
        // Text protocol: DDL and multi-purpose hook statements are not
        // always preparable.
        let result = (&self.pool).execute(statement).await?;
        Ok(result.rows_affected())
    }

    async fn distinct_values(&self, table: &str, column: &str) -> Result<Vec<Option<String>>> {
        let query = SqlGenerator::select_distinct_as_text(table, column);
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;

        // Values that are not valid UTF-8 text fail the run instead of
        // being skipped
        let values = rows
            .iter()
            .map(|row| row.try_get::<Option<String>, _>(0))
            .collect::<std::result::Result<Vec<_>, sqlx::Error>>()?;
        Ok(values)
    }

    async fn replace_value(
        &self,
        table: &str,
        column: &str,
        original: &str,
        replacement: &str,
    ) -> Result<u64> {
        let query = SqlGenerator::replace_value(table, column);
        let result = sqlx::query(&query)
            .bind(replacement)
            .bind(original)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn truncate_table(&self, table: &str) -> Result<()> {
        self.execute(&SqlGenerator::truncate_table(table)).await?;
        Ok(())
    }

    async fn count_rows(&self, table: &str) -> Result<i64> {
        let query = SqlGenerator::count_rows(table);
        let row = sqlx::query(&query).fetch_one(&self.pool).await?;
        Ok(row.try_get::<i64, _>(0)?)
    }

    async fn create_database(&self, db_name: &str) -> Result<()> {
        self.execute(&SqlGenerator::create_database(db_name)).await?;
        info!("Created database {}", db_name);
        Ok(())
    }

    async fn drop_database(&self, db_name: &str) -> Result<()> {
        self.execute(&SqlGenerator::drop_database_if_exists(db_name))
            .await?;
        Ok(())
    }

    async fn try_advisory_lock(&self, name: &str) -> Result<bool> {
        let mut slot = self.lock_conn.lock().await;
        if slot.is_some() {
            return Err(CoreError::Internal(format!(
                "Adapter for {} already holds an advisory lock",
                self.database
            )));
        }

        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query("SELECT GET_LOCK(?, 0)")
            .bind(name)
            .fetch_one(&mut *conn)
            .await?;

        let acquired = row.try_get::<Option<i64>, _>(0)? == Some(1);
        if acquired {
            *slot = Some(conn);
        }
        Ok(acquired)
    }

    async fn release_advisory_lock(&self, name: &str) -> Result<()> {
        let mut slot = self.lock_conn.lock().await;
        let Some(mut conn) = slot.take() else {
            warn!("Advisory lock {} was not held", name);
            return Ok(());
        };

        sqlx::query("SELECT RELEASE_LOCK(?)")
            .bind(name)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    async fn close(&self) {
        self.lock_conn.lock().await.take();
        self.pool.close().await;
    }
}

/// Opens `MySqlAdapter`s
#[derive(Debug, Default, Clone, Copy)]
pub struct MySqlConnector;

#[async_trait]
impl DbConnector for MySqlConnector {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn DbAdapter>> {
        let adapter = MySqlAdapter::connect(config).await?;
        Ok(Arc::new(adapter))
    }
}
