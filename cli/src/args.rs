//! Command line surface

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "snapscrub")]
#[command(about = "Sanitized database snapshots: export and import")]
#[command(version)]
#[command(long_about = "
Snapscrub copies a MySQL database, scrubs sensitive columns, truncates
configured tables, and uploads a gzipped dump to S3. The import command
restores such a snapshot into the local database.

Settings come from snapscrub.toml (or --config) and SNAPSCRUB__* variables,
e.g. SNAPSCRUB__DB__PASSWORD. A .env file is read first.

EXIT CODES:
  0  success, or no snapshot to import
  1  failure
  2  schema drift blocked the export

EXAMPLES:
  snapscrub sanitize-and-export
  snapscrub import-data
  snapscrub import-data staging 20230601120000
")]
pub struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, env = "SNAPSCRUB_CONFIG")]
    pub config: Option<PathBuf>,

    /// Increase verbosity
    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::Count,
        help = "Increase verbosity (-v, -vv)"
    )]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Scrub a copy of the primary database and upload its dump
    SanitizeAndExport,
    /// Replace the local database with a stored snapshot
    ImportData(ImportArgs),
}

#[derive(Args, Debug, PartialEq, Eq)]
pub struct ImportArgs {
    /// Environment the snapshot was taken in (default: production)
    pub env: Option<String>,

    /// Snapshot timestamp, YYYYMMDDHHMMSS (default: latest)
    pub timestamp: Option<String>,
}
