/*!
 * Process Orchestrator
 * Starts a gated cage and its grate, releasing the cage only after the grate is ready
 *
 * Sequence:
 * 1. spawn the cage gated and wait until it is armed
 * 2. spawn the grate naming the cage as its interception target
 * 3. wait (bounded) for the grate's readiness marker
 * 4. release the cage, reap it, then stop and reap the grate
 * 5. journal both exits so their registrations are invalidated
 */

use super::executor::ProcessExecutor;
use super::launch::{CageLaunch, GrateLaunch, ImageSpec, LaunchConfig, GATED_TOKEN};
use super::types::{CageState, ProcessRecord, ProcessResult, Role, Termination};
use crate::core::config::RuntimeConfig;
use crate::core::types::{CageId, GrateId};
use crate::interpose::{JournalRecord, JournalWriter, Registration, RegistrationJournal};
use crate::signals::{CageOutcome, OperatorAck, ReadinessProbe, Rendezvous, RELEASE_SIGNAL, STOP_SIGNAL};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// What to run in one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub cage: ImageSpec,
    pub grate: ImageSpec,
    /// Additionally require an operator's Enter key before release
    #[serde(default)]
    pub operator_ack: bool,
}

/// Result of one cage/grate session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionReport {
    pub cage: ProcessRecord,
    pub grate: ProcessRecord,
    /// Every state the cage passed through, in order
    pub cage_states: Vec<CageState>,
    pub registrations: Vec<Registration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<CageOutcome>,
}

impl SessionReport {
    /// Non-zero when the cage failed or the grate died on its own terms
    pub fn exit_code(&self) -> i32 {
        let cage = self.cage.termination.unwrap_or(Termination::Vanished);
        if !cage.is_success() {
            return cage.exit_code();
        }
        match self.grate.termination {
            Some(t) if t.is_success() => 0,
            // Stopped by us, which is how a grate is meant to end
            Some(t) if t.signal() == Some(STOP_SIGNAL) => 0,
            Some(t) => t.exit_code(),
            None => 1,
        }
    }
}

pub struct Orchestrator {
    executor: ProcessExecutor,
    config: RuntimeConfig,
    probe: Box<dyn ReadinessProbe>,
}

impl Orchestrator {
    /// Orchestrator releasing on the rendezvous marker alone
    pub fn new(config: RuntimeConfig) -> Self {
        let probe = Box::new(Rendezvous::new(config.rendezvous_dir()));
        Self::with_probe(config, probe)
    }

    pub fn with_probe(config: RuntimeConfig, probe: Box<dyn ReadinessProbe>) -> Self {
        Self {
            executor: ProcessExecutor::new(),
            config,
            probe,
        }
    }

    /// Build the orchestrator a session asks for and run it
    pub fn run(config: RuntimeConfig, session: &SessionConfig) -> ProcessResult<SessionReport> {
        let rendezvous = Rendezvous::new(config.rendezvous_dir());
        let probe: Box<dyn ReadinessProbe> = if session.operator_ack {
            Box::new(OperatorAck::stdin(rendezvous))
        } else {
            Box::new(rendezvous)
        };
        Self::with_probe(config, probe).run_session(&session.cage, &session.grate)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn executor(&self) -> &ProcessExecutor {
        &self.executor
    }

    /// Run one cage under one grate to completion
    pub fn run_session(&mut self, cage: &ImageSpec, grate: &ImageSpec) -> ProcessResult<SessionReport> {
        let rendezvous = Rendezvous::new(self.config.rendezvous_dir());
        rendezvous.ensure()?;
        let journal = RegistrationJournal::new(self.config.journal_path()).create()?;

        let mut states = vec![CageState::Created];
        let cage_pid = self.spawn_cage(cage)?;
        let cage_id = CageId::from_pid(cage_pid);

        let executor = self.executor.clone();
        let armed = rendezvous.wait_armed(cage_id, self.config.arm_timeout, &mut || {
            executor.is_alive(cage_pid)
        });
        if let Err(e) = armed {
            error!(cage = %cage_id, error = %e, "Cage never armed");
            self.abort(&[cage_pid]);
            return Err(e.into());
        }
        advance(&mut states, CageState::WaitingForSignal)?;

        let grate_pid = match self.spawn_grate(grate, cage_id) {
            Ok(pid) => pid,
            Err(e) => {
                self.abort(&[cage_pid]);
                return Err(e);
            }
        };
        let grate_id = GrateId::from_pid(grate_pid);

        let ready = self
            .probe
            .await_ready(grate_id, self.config.ready_timeout, &mut || {
                executor.is_alive(grate_pid)
            });
        let marker = match ready {
            Ok(marker) => marker,
            Err(e) => {
                error!(grate = %grate_id, cage = %cage_id, error = %e, "Grate not ready, aborting session");
                self.abort(&[cage_pid, grate_pid]);
                return Err(e.into());
            }
        };

        // Release strictly after the readiness marker has been observed
        if !self.executor.signal(cage_pid, RELEASE_SIGNAL)? {
            warn!(cage = %cage_id, "Cage gone before release");
        }
        advance(&mut states, CageState::Running)?;
        info!(cage = %cage_id, grate = %grate_id, "Cage released");

        let cage_exit = self.executor.reap(cage_pid)?;
        advance(&mut states, CageState::Exited)?;
        info!(cage = %cage_id, "Cage {}", cage_exit);

        self.executor.signal(grate_pid, STOP_SIGNAL)?;
        let grate_exit = self.executor.reap(grate_pid)?;
        info!(grate = %grate_id, "Grate {}", grate_exit);

        record_exits(&journal, grate_id, cage_id)?;

        let outcome = rendezvous.read_outcome(cage_id).unwrap_or_else(|e| {
            warn!(cage = %cage_id, error = %e, "Cage outcome unreadable");
            None
        });

        Ok(SessionReport {
            cage: self.record_or_default(cage_pid, Role::Cage, cage),
            grate: self.record_or_default(grate_pid, Role::Grate, grate),
            cage_states: states,
            registrations: marker.registrations,
            outcome,
        })
    }

    /// Spawn and reap plain programs, reporting each status.
    /// One record per image: reaped children in completion order, then those never started.
    pub fn run_programs(&self, images: &[ImageSpec]) -> ProcessResult<Vec<ProcessRecord>> {
        let env = self.config.child_env();
        let mut not_started = Vec::new();
        for image in images {
            match self.executor.spawn(Role::Program, image, &env, None) {
                Ok(_) => {}
                Err(e) if e.is_leaf() => {
                    warn!(image = %image.name(), error = %e, "Program not started");
                    not_started.push(ProcessRecord::not_started(Role::Program, image.name()));
                }
                Err(e) => return Err(e),
            }
        }
        let mut records = self.executor.reap_all()?;
        records.extend(not_started);
        Ok(records)
    }

    fn spawn_cage(&self, cage: &ImageSpec) -> ProcessResult<Pid> {
        let mut env = self.config.child_env();
        env.push(
            CageLaunch {
                gated: true,
                runtime: self.config.clone(),
            }
            .to_env()?,
        );
        self.executor
            .spawn(Role::Cage, &cage.with_leading_arg(GATED_TOKEN), &env, None)
    }

    fn spawn_grate(&self, grate: &ImageSpec, target: CageId) -> ProcessResult<Pid> {
        let mut env = self.config.child_env();
        env.push(
            GrateLaunch {
                target_cage: target,
                runtime: self.config.clone(),
            }
            .to_env()?,
        );
        self.executor.spawn(Role::Grate, grate, &env, None)
    }

    /// Tear down after a failed handshake
    fn abort(&self, pids: &[Pid]) {
        for pid in pids {
            match self.executor.kill(*pid) {
                Ok(t) => info!(pid = pid.as_raw(), "Aborted process {}", t),
                Err(e) => warn!(pid = pid.as_raw(), error = %e, "Abort could not reap process"),
            }
        }
    }

    fn record_or_default(&self, pid: Pid, role: Role, image: &ImageSpec) -> ProcessRecord {
        self.executor
            .record(pid)
            .unwrap_or_else(|| ProcessRecord::new(role, image.name(), pid.as_raw() as u32))
    }
}

fn advance(states: &mut Vec<CageState>, to: CageState) -> ProcessResult<()> {
    let from = states.last().copied().unwrap_or(CageState::Created);
    states.push(from.transition(to)?);
    Ok(())
}

fn record_exits(journal: &JournalWriter, grate: GrateId, cage: CageId) -> ProcessResult<()> {
    journal.append(JournalRecord::GrateExit { grate })?;
    journal.append(JournalRecord::CageExit { cage })?;
    Ok(())
}
