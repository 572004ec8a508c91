/*!
 * Demo Grate
 * Session mode registers and serves until stopped; chain mode continues a chain
 */

use super::catalog::{chain_interceptions, demo_table, session_interceptions};
use crate::core::config::RuntimeConfig;
use crate::core::errors::LindResult;
use crate::core::types::{CageId, GrateId, HandlerIndex, SyscallNumber};
use crate::interpose::{JournalChannel, Registration, RegistrationClient, RegistrationJournal};
use crate::process::{chain_depth_from_env, ChainLoader, ChainReport, GrateLaunch};
use crate::signals::{stop_listener, ReadyMarker, Rendezvous};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const HEARTBEAT: Duration = Duration::from_secs(1);

/// Register every interception for `target` under `grate` through the journal
pub fn register_all(
    runtime: &RuntimeConfig,
    target: CageId,
    grate: GrateId,
    interceptions: &[(SyscallNumber, HandlerIndex)],
) -> LindResult<Vec<Registration>> {
    let writer = RegistrationJournal::new(runtime.journal_path()).open()?;
    let client = RegistrationClient::new(JournalChannel::new(Arc::new(writer)));

    let mut done = Vec::with_capacity(interceptions.len());
    for (syscall, handler) in interceptions {
        let registration = Registration::new(target, *syscall, *handler, grate);
        client.register(registration)?;
        done.push(registration);
    }
    Ok(done)
}

/// Session grate: register, announce readiness, then idle until the stop signal
pub async fn serve(launch: GrateLaunch) -> LindResult<()> {
    let grate = GrateId::current();
    let runtime = launch.runtime;
    // Calls are dispatched by the cage-side runtime; this process only owns the registrations
    let table = demo_table(&runtime.state_dir);
    info!(
        grate = %grate,
        cage = %launch.target_cage,
        handlers = ?table.names(),
        "Grate starting"
    );

    // Installed before readiness is announced so the stop signal is never lost
    let mut stop = stop_listener()?;

    let registrations = register_all(
        &runtime,
        launch.target_cage,
        grate,
        &session_interceptions(),
    )?;
    Rendezvous::new(runtime.rendezvous_dir()).mark_ready(&ReadyMarker {
        grate,
        target_cage: launch.target_cage,
        registrations,
    })?;

    let mut heartbeat = tokio::time::interval(HEARTBEAT);
    loop {
        tokio::select! {
            _ = stop.recv() => {
                info!(grate = %grate, "Stop signal received, grate exiting");
                break;
            }
            _ = heartbeat.tick() => {
                debug!(grate = %grate, cage = %launch.target_cage, "Grate alive");
            }
        }
    }
    Ok(())
}

/// Chain grate: serve the first cage in `names` and hand the rest to the next grate
pub fn continue_chain(runtime: RuntimeConfig, names: &[String]) -> LindResult<ChainReport> {
    let grate = GrateId::current();
    let depth = chain_depth_from_env();
    info!(grate = %grate, depth, names = ?names, "Grate continuing chain");

    let loader = ChainLoader::new(runtime, chain_interceptions());
    Ok(loader.continue_chain(grate, depth, names)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::syscall_numbers::{GETEUID, GETUID};
    use crate::interpose::InterceptionTable;

    #[test]
    fn test_register_all_lands_in_journal() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = RuntimeConfig::default().with_state_dir(dir.path());
        RegistrationJournal::new(runtime.journal_path()).create().unwrap();

        let done = register_all(
            &runtime,
            CageId::new(20),
            GrateId::new(10),
            &session_interceptions(),
        )
        .unwrap();
        assert_eq!(done.len(), 2);

        let table = InterceptionTable::new();
        RegistrationJournal::new(runtime.journal_path())
            .replay_into(&table)
            .unwrap();
        assert!(table.lookup(CageId::new(20), GETUID).is_some());
        assert!(table.lookup(CageId::new(20), GETEUID).is_some());
    }

    #[test]
    fn test_register_all_refuses_zero_target() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = RuntimeConfig::default().with_state_dir(dir.path());
        RegistrationJournal::new(runtime.journal_path()).create().unwrap();

        assert!(register_all(
            &runtime,
            CageId::new(0),
            GrateId::new(10),
            &session_interceptions()
        )
        .is_err());
    }
}
