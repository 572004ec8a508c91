/*!
 * Chained Loader
 * Processes an alternating grate/cage list one pair per level
 *
 * The top-level loader starts only the first grate. Each grate starts its cage,
 * which registers itself as interception target under that grate before exec, and
 * then starts the next grate with whatever names remain.
 */

use super::executor::{PreExecHook, ProcessExecutor};
use super::launch::{ImageSpec, ENV_CHAIN_DEPTH};
use super::types::{ProcessError, ProcessRecord, ProcessResult, Role};
use crate::core::config::RuntimeConfig;
use crate::core::types::{CageId, GrateId, HandlerIndex, SyscallNumber};
use crate::interpose::{JournalChannel, Registration, RegistrationClient, RegistrationJournal};
use crate::signals::Rendezvous;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// One grate and the cage it serves
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainLink {
    pub grate: String,
    pub cage: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainPlan {
    pub links: Vec<ChainLink>,
}

impl ChainPlan {
    /// `names` alternates grate, cage, grate, cage, ...
    pub fn parse<S: AsRef<str>>(names: &[S]) -> ProcessResult<Self> {
        if names.is_empty() || names.len() % 2 != 0 {
            return Err(ProcessError::UnevenChain(names.len()));
        }
        let links = names
            .chunks_exact(2)
            .map(|pair| ChainLink {
                grate: pair[0].as_ref().to_string(),
                cage: pair[1].as_ref().to_string(),
            })
            .collect();
        Ok(Self { links })
    }

    pub fn depth(&self) -> usize {
        self.links.len()
    }

    /// First grate, carrying every remaining name as its arguments
    pub fn head_image(&self) -> Option<ImageSpec> {
        let (first, rest) = self.links.split_first()?;
        let mut args = vec![first.cage.clone()];
        for link in rest {
            args.push(link.grate.clone());
            args.push(link.cage.clone());
        }
        Some(ImageSpec::new(&first.grate).with_args(args))
    }
}

/// What one level of the chain did
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChainReport {
    pub depth: u32,
    pub records: Vec<ProcessRecord>,
    /// Children that could not be started at all
    pub failures: Vec<String>,
}

impl ChainReport {
    pub fn succeeded(&self) -> bool {
        self.failures.is_empty() && self.records.iter().all(ProcessRecord::succeeded)
    }

    pub fn exit_code(&self) -> i32 {
        if !self.failures.is_empty() {
            return 1;
        }
        self.records
            .iter()
            .filter_map(|r| r.termination)
            .find(|t| !t.is_success())
            .map(|t| t.exit_code().max(1))
            .unwrap_or(0)
    }
}

pub struct ChainLoader {
    executor: ProcessExecutor,
    config: RuntimeConfig,
    interceptions: Vec<(SyscallNumber, HandlerIndex)>,
}

impl ChainLoader {
    /// `interceptions` lists what every chained cage registers under its grate
    pub fn new(config: RuntimeConfig, interceptions: Vec<(SyscallNumber, HandlerIndex)>) -> Self {
        Self {
            executor: ProcessExecutor::new(),
            config,
            interceptions,
        }
    }

    /// Top level: prepare shared state, start the first grate and wait for it
    pub fn launch(&self, plan: &ChainPlan) -> ProcessResult<ChainReport> {
        let depth = u32::try_from(plan.depth()).unwrap_or(u32::MAX);
        if depth > self.config.max_chain_depth {
            return Err(ProcessError::ChainTooDeep {
                depth,
                max: self.config.max_chain_depth,
            });
        }

        Rendezvous::new(self.config.rendezvous_dir()).ensure()?;
        RegistrationJournal::new(self.config.journal_path()).create()?;

        let mut report = ChainReport::default();
        if let Some(head) = plan.head_image() {
            let env = self.child_env(1);
            info!(links = plan.depth(), grate = %head.name(), "Starting chain");
            if let Err(e) = self.executor.spawn(Role::Grate, &head, &env, None) {
                if !e.is_leaf() {
                    return Err(e);
                }
                report.failures.push(e.to_string());
            }
        }
        report.records = self.executor.reap_all()?;
        self.log_report(&report);
        Ok(report)
    }

    /// Inside grate `grate` at `depth`: `names` is `cage [next_grate next_cage ...]`
    pub fn continue_chain(
        &self,
        grate: GrateId,
        depth: u32,
        names: &[String],
    ) -> ProcessResult<ChainReport> {
        let mut report = ChainReport {
            depth,
            ..Default::default()
        };
        let Some((cage, rest)) = names.split_first() else {
            warn!(grate = %grate, depth, "Grate started without a cage to serve");
            return Ok(report);
        };
        if rest.len() % 2 != 0 {
            return Err(ProcessError::UnevenChain(rest.len()));
        }
        if !rest.is_empty() && depth >= self.config.max_chain_depth {
            return Err(ProcessError::ChainTooDeep {
                depth: depth + 1,
                max: self.config.max_chain_depth,
            });
        }

        let writer = RegistrationJournal::new(self.config.journal_path()).open()?;
        let client = RegistrationClient::new(JournalChannel::new(Arc::new(writer)));
        let hook = self.registration_hook(client, grate);

        let env = self.child_env(depth);
        let cage_image = ImageSpec::new(cage);
        if let Err(e) = self.executor.spawn(Role::Cage, &cage_image, &env, Some(hook)) {
            if !e.is_leaf() {
                return Err(e);
            }
            report.failures.push(e.to_string());
        }

        if let Some((next, next_args)) = rest.split_first() {
            let image = ImageSpec::new(next).with_args(next_args.iter().cloned());
            if let Err(e) = self
                .executor
                .spawn(Role::Grate, &image, &self.child_env(depth + 1), None)
            {
                if !e.is_leaf() {
                    return Err(e);
                }
                report.failures.push(e.to_string());
            }
        }

        report.records = self.executor.reap_all()?;
        self.log_report(&report);
        Ok(report)
    }

    /// Registers the freshly forked child under `grate`, before exec
    fn registration_hook(
        &self,
        client: RegistrationClient<JournalChannel>,
        grate: GrateId,
    ) -> PreExecHook {
        let interceptions = self.interceptions.clone();
        Box::new(move || {
            let me = CageId::from_pid(nix::unistd::getpid());
            for (syscall, handler) in &interceptions {
                let status = client.register_raw(&Registration::new(me, *syscall, *handler, grate));
                if status != 0 {
                    let errno = i32::try_from(-status).unwrap_or(nix::libc::EINVAL);
                    return Err(std::io::Error::from_raw_os_error(errno));
                }
            }
            Ok(())
        })
    }

    fn child_env(&self, depth: u32) -> Vec<(String, String)> {
        let mut env = self.config.child_env();
        env.push((ENV_CHAIN_DEPTH.to_string(), depth.to_string()));
        env
    }

    fn log_report(&self, report: &ChainReport) {
        for record in &report.records {
            match record.termination {
                Some(t) => info!(role = %record.role, image = %record.image, pid = record.pid, depth = report.depth, "Chain child {}", t),
                None => warn!(role = %record.role, image = %record.image, pid = record.pid, "Chain child never reaped"),
            }
        }
        for failure in &report.failures {
            warn!(depth = report.depth, failure = %failure, "Chain child not started");
        }
    }
}

/// Depth this process was started at; 1 when not started by a chain
pub fn chain_depth_from_env() -> u32 {
    std::env::var(ENV_CHAIN_DEPTH)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(1)
}
