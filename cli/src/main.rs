//! Snapscrub CLI
//!
//! Operator entry points for sanitized snapshot export and import.

mod args;
mod logging;

use anyhow::Context;
use clap::Parser;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use args::{Cli, Command};
use snapscrub_core::{
    import_snapshot, sanitize_and_export, ExportOutcome, ImportOutcome, PipelineContext, Settings,
};

const EXIT_OK: u8 = 0;
const EXIT_FAILURE: u8 = 1;
const EXIT_DRIFT: u8 = 2;

fn export_exit_code(outcome: &ExportOutcome) -> u8 {
    match outcome {
        ExportOutcome::DriftDetected(_) => EXIT_DRIFT,
        ExportOutcome::Uploaded(_) | ExportOutcome::Discarded => EXIT_OK,
    }
}

fn import_exit_code(outcome: &ImportOutcome) -> u8 {
    match outcome {
        ImportOutcome::Restored { .. } | ImportOutcome::NoSnapshot => EXIT_OK,
    }
}

/// Cancel `token` on the first Ctrl-C
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current stage");
            token.cancel();
        }
    });
}

async fn run(command: Command, settings: Settings) -> anyhow::Result<u8> {
    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());

    let database = settings.db.database.clone();
    let ctx = PipelineContext::connect(settings)
        .await
        .with_context(|| format!("Failed to connect to {}", database))?
        .with_cancellation(cancel);

    let result = match command {
        Command::SanitizeAndExport => sanitize_and_export(&ctx).await.map(|outcome| {
            match &outcome {
                ExportOutcome::Uploaded(key) => info!(key = %key, "Snapshot stored"),
                ExportOutcome::Discarded => info!("Snapshot built and discarded"),
                ExportOutcome::DriftDetected(_) => error!("Export blocked by schema drift"),
            }
            export_exit_code(&outcome)
        }),
        Command::ImportData(import) => {
            import_snapshot(&ctx, import.env.as_deref(), import.timestamp.as_deref())
                .await
                .map(|outcome| {
                    if let ImportOutcome::Restored { env, timestamp } = &outcome {
                        info!("Imported {} snapshot {}", env, timestamp);
                    }
                    import_exit_code(&outcome)
                })
        }
    };

    ctx.close().await;
    Ok(result?)
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let settings = match Settings::load(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("snapscrub: {}", e);
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    if let Err(e) = logging::init(&settings.logging, cli.verbose) {
        eprintln!("snapscrub: {}", e);
        return ExitCode::from(EXIT_FAILURE);
    }

    info!(app = %settings.app_name, env = %settings.env, "Starting snapscrub");

    match run(cli.command, settings).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}
