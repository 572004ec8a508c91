/*!
 * Demo Cage
 * Optionally waits at the readiness gate, then issues identity calls from N threads
 */

use super::catalog::DemoCatalog;
use crate::core::config::RuntimeConfig;
use crate::core::errors::{LindError, LindResult};
use crate::core::syscall_numbers::{self, GETEUID, GETUID};
use crate::core::types::CageId;
use crate::interpose::{HostSyscalls, LoopbackRuntime, SyscallChannel, NOTUSED};
use crate::signals::{CageOutcome, CallRecord, ReadinessGate, Rendezvous};
use std::sync::Arc;
use std::thread;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CageOptions {
    /// Hold the real logic until the release signal arrives
    pub gated: bool,
    pub threads: usize,
}

impl Default for CageOptions {
    fn default() -> Self {
        Self {
            gated: false,
            threads: 1,
        }
    }
}

/// Block at the gate until released
pub fn wait_for_release(cage: CageId, runtime: &RuntimeConfig) -> LindResult<()> {
    let rendezvous = Rendezvous::new(runtime.rendezvous_dir());
    rendezvous.ensure()?;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(LindError::Runtime)?;
    let held = rt.block_on(async {
        match ReadinessGate::new(rendezvous, cage, runtime.arm_timeout).arm() {
            Ok(armed) => armed.released().await,
            Err(e) => Err(e),
        }
    })?;
    info!(cage = %cage, held_ms = held.as_millis() as u64, "Released, running real logic");
    Ok(())
}

pub fn run(options: CageOptions, runtime: &RuntimeConfig) -> LindResult<CageOutcome> {
    let cage = CageId::current();
    if options.gated {
        wait_for_release(cage, runtime)?;
    }

    let loopback = Arc::new(LoopbackRuntime::new(
        runtime.journal_path(),
        Arc::new(DemoCatalog::new(&runtime.state_dir)),
        Arc::new(HostSyscalls),
    ));

    let calls = thread::scope(|scope| {
        let workers: Vec<_> = (0..options.threads.max(1))
            .map(|index| {
                let channel = loopback.channel(cage);
                scope.spawn(move || {
                    [GETUID, GETEUID]
                        .into_iter()
                        .map(|syscall| {
                            let name = syscall_numbers::name_of(syscall);
                            let ret = channel.make_syscall(syscall, name, [NOTUSED; 6]);
                            info!(cage = %cage, thread = index, syscall = name, ret, "Call returned");
                            CallRecord {
                                syscall,
                                name: name.to_string(),
                                ret,
                                thread: index,
                            }
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut calls = Vec::new();
        for worker in workers {
            match worker.join() {
                Ok(records) => calls.extend(records),
                Err(_) => warn!(cage = %cage, "Cage worker panicked"),
            }
        }
        calls
    });

    let outcome = CageOutcome { cage, calls };
    let rendezvous = Rendezvous::new(runtime.rendezvous_dir());
    rendezvous.ensure()?;
    rendezvous.write_outcome(&outcome)?;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::GrateId;
    use crate::demo::catalog::{session_interceptions, UID_GRATE_VAL};
    use crate::demo::grate::register_all;
    use crate::interpose::RegistrationJournal;
    use nix::unistd;

    #[test]
    fn test_ungated_cage_without_registrations_uses_host() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = RuntimeConfig::default().with_state_dir(dir.path());

        let outcome = run(CageOptions::default(), &runtime).unwrap();
        assert_eq!(
            outcome.returns_of(GETUID),
            vec![unistd::getuid().as_raw() as i64]
        );
        assert!(Rendezvous::new(runtime.rendezvous_dir())
            .read_outcome(outcome.cage)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_registered_cage_sees_grate_values_from_every_thread() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = RuntimeConfig::default().with_state_dir(dir.path());
        RegistrationJournal::new(runtime.journal_path()).create().unwrap();
        register_all(
            &runtime,
            CageId::current(),
            GrateId::new(4_000_000),
            &session_interceptions(),
        )
        .unwrap();

        let outcome = run(
            CageOptions {
                gated: false,
                threads: 3,
            },
            &runtime,
        )
        .unwrap();
        assert_eq!(outcome.returns_of(GETUID), vec![UID_GRATE_VAL; 3]);
        assert_eq!(outcome.returns_of(GETEUID).len(), 3);
    }
}
