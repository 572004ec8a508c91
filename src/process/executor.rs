/*!
 * Process Executor
 * Spawns cages and grates, signals them and reaps them
 */

use super::launch::ImageSpec;
use super::types::{ProcessError, ProcessRecord, ProcessResult, Role, Termination};
use ahash::RandomState;
use dashmap::DashMap;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const REAP_POLL_FLOOR: Duration = Duration::from_millis(1);
const REAP_POLL_CEILING: Duration = Duration::from_millis(25);

/// Runs in the child between fork and exec. Must not allocate, lock or log.
pub type PreExecHook = Box<dyn FnMut() -> std::io::Result<()> + Send + Sync>;

/// Manages OS processes on behalf of the loader and chain grates
pub struct ProcessExecutor {
    processes: Arc<DashMap<u32, ProcessRecord, RandomState>>,
}

impl ProcessExecutor {
    pub fn new() -> Self {
        debug!("Process executor initialized");
        Self {
            processes: Arc::new(DashMap::with_hasher(RandomState::new())),
        }
    }

    /// Spawn `image` with extra environment entries; the parent environment is inherited
    pub fn spawn(
        &self,
        role: Role,
        image: &ImageSpec,
        env: &[(String, String)],
        pre_exec: Option<PreExecHook>,
    ) -> ProcessResult<Pid> {
        let mut cmd = Command::new(&image.program);
        cmd.args(&image.args)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        let hooked = pre_exec.is_some();
        if let Some(hook) = pre_exec {
            // SAFETY: callers only install hooks that avoid allocation and locking
            unsafe {
                cmd.pre_exec(hook);
            }
        }

        let child = cmd
            .spawn()
            .map_err(|source| classify_spawn_error(image.name(), source, hooked))?;

        let pid = child.id();
        // The child is reaped through waitpid on its pid, not through the handle
        drop(child);

        info!(role = %role, image = %image.name(), pid, "Spawned process");
        self.processes
            .insert(pid, ProcessRecord::new(role, image.name(), pid));

        Ok(Pid::from_raw(pid as i32))
    }

    /// Deliver `signal`. Returns `false` when the process is already gone.
    /// A pid this executor has reaped is never signalled again; it may belong to someone else now.
    pub fn signal(&self, pid: Pid, signal: Signal) -> ProcessResult<bool> {
        if let Some(done) = self.termination(pid) {
            debug!(pid = pid.as_raw(), signal = %signal, "Not signalling reaped process ({})", done);
            return Ok(false);
        }
        match kill(pid, signal) {
            Ok(()) => {
                debug!(pid = pid.as_raw(), signal = %signal, "Signal delivered");
                Ok(true)
            }
            Err(Errno::ESRCH) => {
                debug!(pid = pid.as_raw(), signal = %signal, "Signal target already gone");
                Ok(false)
            }
            Err(source) => Err(ProcessError::SignalFailed {
                pid: pid.as_raw() as u32,
                signal,
                source,
            }),
        }
    }

    /// Kill a process outright and reap it
    pub fn kill(&self, pid: Pid) -> ProcessResult<Termination> {
        self.signal(pid, Signal::SIGKILL)?;
        self.reap(pid)
    }

    /// Non-blocking reap; `Some` once the process has terminated
    pub fn try_reap(&self, pid: Pid) -> ProcessResult<Option<Termination>> {
        if let Some(done) = self.termination(pid) {
            return Ok(Some(done));
        }
        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => Ok(None),
            Ok(status) => Ok(Termination::from_wait_status(status).map(|t| self.record_exit(pid, t))),
            Err(Errno::ECHILD) => Ok(Some(self.record_exit(pid, Termination::Vanished))),
            Err(Errno::EINTR) => Ok(None),
            Err(source) => Err(ProcessError::WaitFailed {
                pid: pid.as_raw() as u32,
                source,
            }),
        }
    }

    /// Alive means not yet reaped and not a zombie
    pub fn is_alive(&self, pid: Pid) -> bool {
        matches!(self.try_reap(pid), Ok(None))
    }

    /// Block until `pid` terminates. A child that is already gone is reported, not failed.
    pub fn reap(&self, pid: Pid) -> ProcessResult<Termination> {
        if let Some(done) = self.termination(pid) {
            return Ok(done);
        }
        loop {
            match waitpid(pid, None) {
                Ok(status) => {
                    if let Some(t) = Termination::from_wait_status(status) {
                        return Ok(self.record_exit(pid, t));
                    }
                }
                Err(Errno::EINTR) => continue,
                Err(Errno::ECHILD) => {
                    warn!(pid = pid.as_raw(), "No such child, treating as already reaped");
                    return Ok(self.record_exit(pid, Termination::Vanished));
                }
                Err(source) => {
                    error!(pid = pid.as_raw(), error = %source, "waitpid failed");
                    return Err(ProcessError::WaitFailed {
                        pid: pid.as_raw() as u32,
                        source,
                    });
                }
            }
        }
    }

    /// Reap every outstanding child, returning records in completion order
    pub fn reap_all(&self) -> ProcessResult<Vec<ProcessRecord>> {
        let mut outstanding: Vec<Pid> = self
            .processes
            .iter()
            .filter(|p| p.termination.is_none())
            .map(|p| Pid::from_raw(p.pid as i32))
            .collect();
        let mut finished = Vec::with_capacity(outstanding.len());
        let mut delay = REAP_POLL_FLOOR;

        while !outstanding.is_empty() {
            let mut progressed = false;
            let mut i = 0;
            while i < outstanding.len() {
                let pid = outstanding[i];
                if self.try_reap(pid)?.is_some() {
                    outstanding.swap_remove(i);
                    if let Some(record) = self.record(pid) {
                        finished.push(record);
                    }
                    progressed = true;
                } else {
                    i += 1;
                }
            }
            if progressed {
                delay = REAP_POLL_FLOOR;
            } else {
                thread::sleep(delay);
                delay = (delay * 2).min(REAP_POLL_CEILING);
            }
        }

        Ok(finished)
    }

    pub fn record(&self, pid: Pid) -> Option<ProcessRecord> {
        self.processes
            .get(&(pid.as_raw() as u32))
            .map(|r| r.value().clone())
    }

    pub fn records(&self) -> Vec<ProcessRecord> {
        let mut out: Vec<ProcessRecord> = self.processes.iter().map(|r| r.value().clone()).collect();
        out.sort_by_key(|r| r.pid);
        out
    }

    /// Count of children not yet reaped
    pub fn running(&self) -> usize {
        self.processes
            .iter()
            .filter(|p| p.termination.is_none())
            .count()
    }

    fn termination(&self, pid: Pid) -> Option<Termination> {
        self.processes
            .get(&(pid.as_raw() as u32))
            .and_then(|r| r.termination)
    }

    fn record_exit(&self, pid: Pid, termination: Termination) -> Termination {
        let key = pid.as_raw() as u32;
        match self.processes.get_mut(&key) {
            Some(mut record) => {
                record.termination = Some(termination);
                info!(
                    role = %record.role,
                    image = %record.image,
                    pid = key,
                    "Process {}",
                    termination
                );
            }
            None => info!(pid = key, "Unmanaged process {}", termination),
        }
        termination
    }
}

fn classify_spawn_error(image: String, source: std::io::Error, hooked: bool) -> ProcessError {
    let code = source.raw_os_error();
    let image_errors = [Errno::ENOENT, Errno::EACCES, Errno::ENOEXEC, Errno::ENOTDIR];
    let resource_errors = [Errno::EAGAIN, Errno::ENOMEM];

    let error = match code {
        Some(c) if image_errors.iter().any(|e| *e as i32 == c) => {
            ProcessError::ImageReplacementFailed { image, source }
        }
        Some(c) if hooked && !resource_errors.iter().any(|e| *e as i32 == c) => {
            ProcessError::ChildSetupFailed { image, source }
        }
        _ => ProcessError::CreationFailed { image, source },
    };
    error!(error = %error, "Spawn failed");
    error
}

impl Clone for ProcessExecutor {
    fn clone(&self) -> Self {
        Self {
            processes: Arc::clone(&self.processes),
        }
    }
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::new()
    }
}
