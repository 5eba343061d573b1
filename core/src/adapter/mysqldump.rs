//! `mysqldump` / `mysql` command-line dump tool

use async_trait::async_trait;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::info;

use crate::adapter::{DumpScope, DumpTool};
use crate::domain::ConnectionConfig;
use crate::error::Result;
use crate::process::{run_with_deadline, ProcessOutcome};

/// Dump tool backed by the MySQL client binaries
#[derive(Debug, Clone)]
pub struct MysqlDumpTool {
    /// Deadline for each process
    timeout: Duration,
    dump_program: String,
    client_program: String,
}

impl MysqlDumpTool {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            dump_program: "mysqldump".to_string(),
            client_program: "mysql".to_string(),
        }
    }

    /// Override the binaries, e.g. for versioned installs
    pub fn with_programs(mut self, dump_program: &str, client_program: &str) -> Self {
        self.dump_program = dump_program.to_string();
        self.client_program = client_program.to_string();
        self
    }

    fn connection_args(config: &ConnectionConfig) -> Vec<String> {
        vec![
            "-h".to_string(),
            config.host.clone(),
            "-P".to_string(),
            config.port.to_string(),
            "-u".to_string(),
            config.username.clone(),
        ]
    }

    /// Arguments for `mysqldump`. The password travels in `MYSQL_PWD`.
    pub fn dump_args(config: &ConnectionConfig, scope: &DumpScope) -> Vec<String> {
        let mut args = Self::connection_args(config);

        if matches!(scope, DumpScope::SchemaOnly(_)) {
            args.push("--no-data".to_string());
        }
        args.push(config.database.clone());

        match scope {
            DumpScope::Full => {}
            DumpScope::Tables(tables) | DumpScope::SchemaOnly(tables) => {
                args.extend(tables.iter().cloned());
            }
        }

        args
    }

    pub fn restore_args(config: &ConnectionConfig) -> Vec<String> {
        let mut args = Self::connection_args(config);
        args.push("-D".to_string());
        args.push(config.database.clone());
        args
    }

    fn command(&self, program: &str, config: &ConnectionConfig, args: &[String]) -> Command {
        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(ref password) = config.password {
            cmd.env("MYSQL_PWD", password);
        }
        cmd
    }
}

#[async_trait]
impl DumpTool for MysqlDumpTool {
    async fn dump_to_file(
        &self,
        config: &ConnectionConfig,
        scope: &DumpScope,
        path: &Path,
        append: bool,
    ) -> Result<ProcessOutcome> {
        let args = Self::dump_args(config, scope);
        info!(
            "{} {} >{} {}",
            self.dump_program,
            args.join(" "),
            if append { ">" } else { "" },
            path.display()
        );

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(path)?;

        let mut cmd = self.command(&self.dump_program, config, &args);
        cmd.stdin(Stdio::null()).stdout(Stdio::from(file));

        run_with_deadline(cmd, self.timeout).await
    }

    async fn restore_from_file(
        &self,
        config: &ConnectionConfig,
        path: &Path,
    ) -> Result<ProcessOutcome> {
        let args = Self::restore_args(config);
        info!("{} {} < {}", self.client_program, args.join(" "), path.display());

        let file = File::open(path)?;
        let mut cmd = self.command(&self.client_program, config, &args);
        cmd.stdin(Stdio::from(file)).stdout(Stdio::null());

        run_with_deadline(cmd, self.timeout).await
    }
}
