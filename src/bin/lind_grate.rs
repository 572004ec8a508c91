/*!
 * lind-grate
 * Demo grate: session mode when launched by grate-loader, chain mode otherwise
 */

use anyhow::{Context, Result};
use clap::Parser;
use lind_grates::cli::GrateCli;
use lind_grates::demo;
use lind_grates::process::{GrateLaunch, LaunchConfig};
use lind_grates::{init_tracing, LindError};
use std::process::ExitCode;
use tracing::{error, info};

fn main() -> ExitCode {
    init_tracing();
    match run() {
        Ok(code) => ExitCode::from(u8::try_from(code.clamp(0, 255)).unwrap_or(1)),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<i32> {
    let cli = GrateCli::parse();

    if let Some(launch) = GrateLaunch::from_env().map_err(LindError::from)? {
        info!(cage = %launch.target_cage, "Grate in session mode");
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to start async runtime")?;
        rt.block_on(demo::grate::serve(launch))?;
        return Ok(0);
    }

    let config = cli.runtime.runtime_config().map_err(LindError::from)?;
    let report = demo::grate::continue_chain(config, &cli.chain).context("chain step failed")?;
    Ok(report.exit_code())
}
