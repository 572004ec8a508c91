/*!
 * grate-loader
 * Starts cages under grates: gated sessions, grate/cage chains, or plain programs
 */

use anyhow::{Context, Result};
use clap::Parser;
use lind_grates::cli::{LoaderCli, LoaderCommand};
use lind_grates::process::{ChainLoader, ChainPlan, ImageSpec, Orchestrator};
use lind_grates::{demo, init_tracing, LindError};
use std::process::ExitCode;
use tracing::{error, info};

fn main() -> ExitCode {
    init_tracing();
    match run() {
        Ok(code) => exit_code(code),
        Err(e) => {
            error!("{:#}", e);
            let code = e
                .downcast_ref::<LindError>()
                .map(LindError::exit_code)
                .unwrap_or(1);
            exit_code(code)
        }
    }
}

fn run() -> Result<i32> {
    let cli = LoaderCli::parse();
    let config = cli
        .runtime
        .runtime_config()
        .map_err(LindError::from)
        .context("invalid runtime configuration")?;
    info!(state_dir = %config.state_dir.display(), "grate-loader starting");

    match &cli.command {
        command @ LoaderCommand::Session { .. } => {
            let session = command
                .session_config()
                .context("session arguments missing")?;
            let report = Orchestrator::run(config, &session)
                .map_err(LindError::from)
                .context("session failed")?;
            info!(
                cage = %report.cage.pid,
                grate = %report.grate.pid,
                states = ?report.cage_states,
                registrations = report.registrations.len(),
                "Session finished"
            );
            if let Some(outcome) = &report.outcome {
                for call in &outcome.calls {
                    info!(thread = call.thread, syscall = %call.name, ret = call.ret, "Cage call");
                }
            }
            Ok(report.exit_code())
        }
        LoaderCommand::Chain { images } => {
            let plan = ChainPlan::parse(images.as_slice()).map_err(LindError::from)?;
            let loader = ChainLoader::new(config, demo::chain_interceptions());
            let report = loader
                .launch(&plan)
                .map_err(LindError::from)
                .context("chain failed")?;
            Ok(report.exit_code())
        }
        LoaderCommand::Run { programs } => {
            let images: Vec<ImageSpec> = programs.iter().map(ImageSpec::new).collect();
            let records = Orchestrator::new(config)
                .run_programs(&images)
                .map_err(LindError::from)?;
            for record in &records {
                if let Some(t) = record.termination {
                    info!(image = %record.image, pid = record.pid, started = record.was_started(), "Program {}", t);
                }
            }
            let failed = records.iter().filter(|r| !r.succeeded()).count();
            info!(programs = records.len(), failed, "All programs reaped");
            Ok(i32::from(failed > 0))
        }
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code.clamp(0, 255)).unwrap_or(1))
}
