mod cli;
mod pipeline;

use std::process::ExitCode;

use clap::Parser;
use diag_settings::DiagSettings;
use tokio_util::sync::CancellationToken;

use crate::cli::Cli;
use crate::pipeline::Invocation;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match load_settings(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("hot-diagnose: invalid settings: {e}");
            return ExitCode::FAILURE;
        }
    };

    let _telemetry = match pipeline::telemetry_config(&settings)
        .and_then(|config| Ok(diag_telemetry::init_telemetry(config)?))
    {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("hot-diagnose: cannot initialise logging: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let root = match cli
        .root
        .clone()
        .map_or_else(std::env::current_dir, std::path::absolute)
    {
        Ok(root) => root,
        Err(e) => {
            tracing::error!(error = %e, "cannot determine working directory");
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, shutting down");
            interrupt.cancel();
        }
    });

    let invocation = Invocation {
        source: cli.source,
        args: cli.args,
        root,
        settings,
    };
    match pipeline::run(invocation, cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "hot-diagnose failed");
            ExitCode::FAILURE
        }
    }
}

/// Settings file (or defaults), env overrides, then command-line flags.
fn load_settings(cli: &Cli) -> diag_settings::Result<DiagSettings> {
    let mut settings = match cli.settings.as_deref() {
        Some(path) => diag_settings::load_settings_from_path(path)?,
        None => diag_settings::load_settings()?,
    };
    cli.apply(&mut settings);
    diag_settings::validate(&settings)?;
    Ok(settings)
}
