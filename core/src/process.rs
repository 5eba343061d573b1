//! External process invocation with deadlines

use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::error::{CoreError, Result};

/// Exit status and stderr of one finished external process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub program: String,
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
    pub stderr: String,
}

impl ProcessOutcome {
    pub fn succeeded(program: &str) -> Self {
        Self {
            program: program.to_string(),
            code: Some(0),
            stderr: String::new(),
        }
    }

    pub fn failed(program: &str, code: i32, stderr: &str) -> Self {
        Self {
            program: program.to_string(),
            code: Some(code),
            stderr: stderr.to_string(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Convert a non-zero exit into the caller's error variant
    pub fn check(self, into_error: impl FnOnce(String) -> CoreError) -> Result<()> {
        if self.success() {
            return Ok(());
        }
        let code = self
            .code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        Err(into_error(format!(
            "{} exited with {}: {}",
            self.program,
            code,
            self.stderr.trim()
        )))
    }
}

/// Run a prepared command to completion within `limit`.
///
/// Stdout is left as configured by the caller; stderr is captured. The child
/// is killed if the deadline passes.
pub async fn run_with_deadline(mut cmd: Command, limit: Duration) -> Result<ProcessOutcome> {
    let program = cmd
        .as_std()
        .get_program()
        .to_string_lossy()
        .into_owned();

    cmd.stderr(Stdio::piped()).kill_on_drop(true);

    let child = cmd.spawn().map_err(|e| {
        CoreError::Internal(format!("Failed to execute {}: {}", program, e))
    })?;

    let output = tokio::time::timeout(limit, child.wait_with_output())
        .await
        .map_err(|_| CoreError::Timeout {
            program: program.clone(),
            seconds: limit.as_secs(),
        })??;

    debug!(program = %program, code = ?output.status.code(), "process finished");

    Ok(ProcessOutcome {
        program,
        code: output.status.code(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
