/*!
 * lind-cage
 * Demo cage: calls getuid and geteuid, optionally after waiting at the gate
 */

use anyhow::{Context, Result};
use clap::Parser;
use lind_grates::cli::CageCli;
use lind_grates::demo::{self, CageOptions};
use lind_grates::process::{CageLaunch, LaunchConfig};
use lind_grates::{init_tracing, LindError};
use std::process::ExitCode;
use tracing::{error, info};

fn main() -> ExitCode {
    init_tracing();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let cli = CageCli::parse();
    let config = match CageLaunch::from_env().map_err(LindError::from)? {
        Some(launch) => launch.runtime,
        None => cli.runtime.runtime_config().map_err(LindError::from)?,
    };

    let options = CageOptions {
        gated: cli.gated(),
        threads: cli.threads,
    };
    let outcome = demo::cage::run(options, &config).context("cage logic failed")?;
    info!(cage = %outcome.cage, calls = outcome.calls.len(), "Cage finished");
    Ok(())
}
