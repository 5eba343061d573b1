//! Pipeline configuration
//!
//! Settings are an explicit value handed to every entry point. They are read
//! from an optional file and overlaid with `SNAPSCRUB__*` environment
//! variables, e.g. `SNAPSCRUB__DB__PASSWORD`.

use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::{ColumnRules, ConnectionConfig, Manifest};
use crate::error::{CoreError, Result};

/// Config file looked up in the working directory when none is given
pub const DEFAULT_CONFIG_NAME: &str = "snapscrub";

/// Environment variable prefix
pub const ENV_PREFIX: &str = "SNAPSCRUB";

pub const DEFAULT_BUCKET: &str = "snapscrub";

/// Logging options for the CLI subscriber
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    #[serde(default)]
    pub level: Option<String>,
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

/// Everything a pipeline run needs to know
#[derive(Clone, Deserialize)]
pub struct Settings {
    pub app_name: String,
    #[serde(default = "default_env")]
    pub env: String,
    /// Primary database; clones reuse it with another database name
    pub db: ConnectionConfig,

    #[serde(default)]
    pub tables_to_sanitize: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub tables_to_truncate: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub tables_to_ignore: BTreeSet<String>,
    #[serde(default)]
    pub sanitization_column_rules: ColumnRules,
    /// Table -> SQL statements run after that table is scrubbed
    #[serde(default)]
    pub custom_sanitization_hooks: BTreeMap<String, Vec<String>>,

    #[serde(default = "default_bucket")]
    pub s3_bucket: String,
    #[serde(default)]
    pub s3_bucket_region: Option<String>,
    /// Endpoint override for S3-compatible stores
    #[serde(default)]
    pub s3_endpoint: Option<String>,
    #[serde(default)]
    pub aws_access_key_id: Option<String>,
    #[serde(default)]
    pub aws_secret_access_key: Option<String>,

    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default = "default_root_path")]
    pub root_path: PathBuf,
    #[serde(default = "default_process_timeout_secs")]
    pub process_timeout_secs: u64,
    /// Fixed seed for replacement picks
    #[serde(default)]
    pub sanitization_seed: Option<u64>,
    /// Leave the clone in place when scrubbing fails
    #[serde(default = "default_keep_clone_on_failure")]
    pub keep_clone_on_failure: bool,
}

fn default_env() -> String {
    std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string())
}

fn default_bucket() -> String {
    DEFAULT_BUCKET.to_string()
}

fn default_root_path() -> PathBuf {
    PathBuf::from(".")
}

fn default_process_timeout_secs() -> u64 {
    3600
}

fn default_keep_clone_on_failure() -> bool {
    true
}

impl Settings {
    /// Load from `path` (or `snapscrub.{toml,yaml,json}` if present) and the
    /// environment, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => config::File::from(path),
            None => config::File::with_name(DEFAULT_CONFIG_NAME).required(false),
        };

        let settings: Settings = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Parse TOML text without consulting the environment
    pub fn from_toml(text: &str) -> Result<Self> {
        let settings: Settings = config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Reject configurations the pipeline cannot run safely
    pub fn validate(&self) -> Result<()> {
        if self.app_name.trim().is_empty() {
            return Err(CoreError::Config("app_name must not be empty".to_string()));
        }
        if self.db.database.trim().is_empty() {
            return Err(CoreError::Config("db.database must not be empty".to_string()));
        }

        let overlap = self.manifest().overlapping_tables();
        if !overlap.is_empty() {
            return Err(CoreError::Config(format!(
                "Tables listed for both sanitization and truncation: {}",
                overlap.join(", ")
            )));
        }

        let empty = self.sanitization_column_rules.empty_rules();
        if !empty.is_empty() {
            return Err(CoreError::Config(format!(
                "Sanitization rules without replacement values: {}",
                empty.join(", ")
            )));
        }

        let orphan_hooks: Vec<&str> = self
            .custom_sanitization_hooks
            .keys()
            .filter(|table| !self.tables_to_sanitize.contains_key(*table))
            .map(String::as_str)
            .collect();
        if !orphan_hooks.is_empty() {
            return Err(CoreError::Config(format!(
                "Custom hooks for tables not in tables_to_sanitize: {}",
                orphan_hooks.join(", ")
            )));
        }

        Ok(())
    }

    pub fn manifest(&self) -> Manifest {
        Manifest {
            tables_to_sanitize: self.tables_to_sanitize.clone(),
            tables_to_truncate: self.tables_to_truncate.clone(),
        }
    }

    /// Uploads need a bucket and both halves of the credentials
    pub fn upload_enabled(&self) -> bool {
        !self.s3_bucket.is_empty()
            && self.aws_access_key_id.as_deref().is_some_and(|k| !k.is_empty())
            && self.aws_secret_access_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    pub fn process_timeout(&self) -> Duration {
        Duration::from_secs(self.process_timeout_secs)
    }

    /// Working directory for dump files
    pub fn tmp_dir(&self) -> PathBuf {
        self.root_path.join("tmp")
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("app_name", &self.app_name)
            .field("env", &self.env)
            .field("db", &self.db)
            .field("tables_to_sanitize", &self.tables_to_sanitize.len())
            .field("tables_to_truncate", &self.tables_to_truncate.len())
            .field("tables_to_ignore", &self.tables_to_ignore)
            .field("s3_bucket", &self.s3_bucket)
            .field("s3_bucket_region", &self.s3_bucket_region)
            .field("upload_enabled", &self.upload_enabled())
            .field("root_path", &self.root_path)
            .finish_non_exhaustive()
    }
}
