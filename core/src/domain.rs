//! Domain models for the sanitization and snapshot pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Environments that are dumped straight from the primary database.
pub const UNSANITIZED_ENVIRONMENTS: [&str; 2] = ["development", "integration"];

/// Engine segment of every snapshot key.
pub const SNAPSHOT_ENGINE: &str = "mysql";

/// Timestamp layout used in snapshot keys. Zero-padded, so lexical order is
/// chronological order.
pub const SNAPSHOT_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Whether a run in `env` skips cloning and scrubbing.
pub fn skips_sanitization(env: &str) -> bool {
    UNSANITIZED_ENVIRONMENTS.contains(&env)
}

/// Declarative mapping of tables to their expected columns and disposition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Rows kept, values scrubbed
    #[serde(default)]
    pub tables_to_sanitize: BTreeMap<String, Vec<String>>,
    /// Rows dropped, schema kept
    #[serde(default)]
    pub tables_to_truncate: BTreeMap<String, Vec<String>>,
}

impl Manifest {
    /// Merge both dispositions into one table -> sorted columns map.
    ///
    /// A table listed under both keys resolves to its truncate entry.
    pub fn comparison_map(&self) -> BTreeMap<String, Vec<String>> {
        self.tables_to_sanitize
            .iter()
            .chain(self.tables_to_truncate.iter())
            .map(|(table, columns)| (table.clone(), sorted_columns(columns.clone())))
            .collect()
    }

    /// Tables listed under both dispositions
    pub fn overlapping_tables(&self) -> Vec<String> {
        self.tables_to_sanitize
            .keys()
            .filter(|table| self.tables_to_truncate.contains_key(*table))
            .cloned()
            .collect()
    }

    /// Expected columns for a table, whichever disposition it has
    pub fn expected_columns(&self, table: &str) -> Option<&[String]> {
        self.tables_to_truncate
            .get(table)
            .or_else(|| self.tables_to_sanitize.get(table))
            .map(Vec::as_slice)
    }

    pub fn sanitize_tables(&self) -> Vec<String> {
        self.tables_to_sanitize.keys().cloned().collect()
    }

    pub fn truncate_tables(&self) -> Vec<String> {
        self.tables_to_truncate.keys().cloned().collect()
    }
}

/// Sort column names case-insensitively so both sides of a drift comparison
/// line up.
pub fn sorted_columns(mut columns: Vec<String>) -> Vec<String> {
    columns.sort_by_key(|c| c.to_ascii_lowercase());
    columns
}

/// Column name -> candidate replacement values
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnRules(pub BTreeMap<String, Vec<String>>);

impl ColumnRules {
    /// Replacement pool for a column, matched case-insensitively
    pub fn replacements(&self, column: &str) -> Option<&[String]> {
        self.0
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
            .map(|(_, values)| values.as_slice())
    }

    /// Rules whose replacement pool is empty
    pub fn empty_rules(&self) -> Vec<String> {
        self.0
            .iter()
            .filter(|(_, values)| values.is_empty())
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, Vec<String>)> for ColumnRules {
    fn from_iter<I: IntoIterator<Item = (String, Vec<String>)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Connection settings for the primary database and its clones
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    pub database: String,
    #[serde(default = "default_adapter")]
    pub adapter: String,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    3306
}

fn default_username() -> String {
    "root".to_string()
}

fn default_adapter() -> String {
    "mysql".to_string()
}

impl ConnectionConfig {
    pub fn new(host: &str, username: &str, password: Option<&str>, database: &str) -> Self {
        Self {
            host: host.to_string(),
            port: default_port(),
            username: username.to_string(),
            password: password.map(str::to_string),
            database: database.to_string(),
            adapter: default_adapter(),
        }
    }

    /// Same server and credentials, different database
    pub fn with_database(&self, database: &str) -> Self {
        Self {
            database: database.to_string(),
            ..self.clone()
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "********"))
            .field("database", &self.database)
            .field("adapter", &self.adapter)
            .finish()
    }
}

/// Result of comparing the live schema against the manifest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftReport {
    pub pass: bool,
    pub error: Option<String>,
    /// Live columns the manifest does not know, per table
    pub detail: BTreeMap<String, Vec<String>>,
    /// Manifest columns absent from the live schema, per table
    pub missing: BTreeMap<String, Vec<String>>,
}

impl DriftReport {
    pub fn passed() -> Self {
        Self {
            pass: true,
            ..Default::default()
        }
    }

    /// Every table named anywhere in the report
    pub fn drifted_tables(&self) -> Vec<&str> {
        let mut tables: Vec<&str> = self
            .detail
            .keys()
            .chain(self.missing.keys())
            .map(String::as_str)
            .collect();
        tables.sort_unstable();
        tables.dedup();
        tables
    }
}

/// Identifier of one pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// First eight hex characters, used as the clone name suffix
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Object-storage location of one snapshot file:
/// `{app_name}/{env}/mysql/{timestamp}/{filename}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotKey {
    pub app_name: String,
    pub env: String,
    pub timestamp: String,
    pub filename: String,
}

impl SnapshotKey {
    pub fn new(app_name: &str, env: &str, taken_at: DateTime<Utc>, filename: &str) -> Self {
        Self {
            app_name: app_name.to_string(),
            env: env.to_string(),
            timestamp: taken_at.format(SNAPSHOT_TIMESTAMP_FORMAT).to_string(),
            filename: filename.to_string(),
        }
    }

    /// Prefix shared by every snapshot of an application environment
    pub fn env_prefix(app_name: &str, env: &str) -> String {
        format!("{}/{}/{}", app_name, env, SNAPSHOT_ENGINE)
    }

    /// Prefix shared by every file of one snapshot
    pub fn snapshot_prefix(app_name: &str, env: &str, timestamp: &str) -> String {
        format!("{}/{}", Self::env_prefix(app_name, env), timestamp)
    }
}

impl fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            Self::snapshot_prefix(&self.app_name, &self.env, &self.timestamp),
            self.filename
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn manifest() -> Manifest {
        Manifest {
            tables_to_sanitize: BTreeMap::from([
                (
                    "people".to_string(),
                    vec!["name".into(), "Age".into(), "id".into()],
                ),
                ("cars".to_string(), vec!["make".into(), "id".into()]),
            ]),
            tables_to_truncate: BTreeMap::from([(
                "hotels".to_string(),
                vec!["name".into(), "id".into()],
            )]),
        }
    }

    #[test]
    fn test_comparison_map_sorts_columns() {
        let map = manifest().comparison_map();
        assert_eq!(map.len(), 3);
        assert_eq!(map["people"], vec!["Age", "id", "name"]);
        assert_eq!(map["hotels"], vec!["id", "name"]);
    }

    #[test]
    fn test_comparison_map_truncate_wins_on_overlap() {
        let mut m = manifest();
        m.tables_to_truncate
            .insert("cars".to_string(), vec!["id".into()]);

        assert_eq!(m.overlapping_tables(), vec!["cars".to_string()]);
        assert_eq!(m.comparison_map()["cars"], vec!["id"]);
    }

    #[test]
    fn test_column_rules_case_insensitive_lookup() {
        let rules: ColumnRules = [("Name".to_string(), vec!["Tony".to_string()])]
            .into_iter()
            .collect();
        assert_eq!(rules.replacements("name"), Some(&["Tony".to_string()][..]));
        assert!(rules.replacements("make").is_none());
    }

    #[test]
    fn test_with_database_keeps_credentials() {
        let primary = ConnectionConfig::new("db.internal", "app", Some("secret"), "shop");
        let clone = primary.with_database("shop_copy_1234abcd");

        assert_eq!(clone.database, "shop_copy_1234abcd");
        assert_eq!(clone.host, primary.host);
        assert_eq!(clone.password, primary.password);
    }

    #[test]
    fn test_connection_config_debug_hides_password() {
        let config = ConnectionConfig::new("localhost", "root", Some("hunter2"), "shop");
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("********"));
    }

    #[test]
    fn test_snapshot_key_display() {
        let taken_at = Utc.with_ymd_and_hms(2023, 6, 1, 12, 0, 0).unwrap();
        let key = SnapshotKey::new("shop", "production", taken_at, "data.dump.gz");
        assert_eq!(
            key.to_string(),
            "shop/production/mysql/20230601120000/data.dump.gz"
        );
    }

    #[test]
    fn test_run_id_short() {
        let id = RunId::from_uuid(Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap());
        assert_eq!(id.short(), "550e8400");
    }

    #[test]
    fn test_skips_sanitization() {
        assert!(skips_sanitization("development"));
        assert!(skips_sanitization("integration"));
        assert!(!skips_sanitization("production"));
        assert!(!skips_sanitization("staging"));
    }
}
