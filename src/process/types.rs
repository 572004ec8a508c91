/*!
 * Process Types
 * Roles, cage lifecycle states, termination classification and errors
 */

use crate::interpose::{JournalError, RegistrationError};
use crate::signals::GateError;
use miette::Diagnostic;
use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Process operation result
pub type ProcessResult<T> = Result<T, ProcessError>;

#[derive(Error, Debug, Diagnostic)]
pub enum ProcessError {
    #[error("failed to create process for {image}: {source}")]
    #[diagnostic(
        code(process::creation_failed),
        help("Check system resources and process limits. Startup is aborted.")
    )]
    CreationFailed {
        image: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not replace image with {image}: {source}")]
    #[diagnostic(
        code(process::image_replacement_failed),
        help("Check that the executable exists and is runnable.")
    )]
    ImageReplacementFailed {
        image: String,
        #[source]
        source: std::io::Error,
    },

    #[error("child setup for {image} failed before exec: {source}")]
    #[diagnostic(
        code(process::child_setup_failed),
        help("The child could not register itself as an interception target.")
    )]
    ChildSetupFailed {
        image: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid cage state transition: {from:?} -> {to:?}")]
    #[diagnostic(code(process::invalid_state))]
    InvalidStateTransition { from: CageState, to: CageState },

    #[error("process {0} is not managed by this executor")]
    #[diagnostic(code(process::not_found))]
    NotFound(u32),

    #[error("could not deliver {signal} to {pid}: {source}")]
    #[diagnostic(code(process::signal_failed))]
    SignalFailed {
        pid: u32,
        signal: Signal,
        #[source]
        source: Errno,
    },

    #[error("waiting for {pid} failed: {source}")]
    #[diagnostic(code(process::wait_failed))]
    WaitFailed {
        pid: u32,
        #[source]
        source: Errno,
    },

    #[error("launch configuration in {var} is malformed: {source}")]
    #[diagnostic(code(process::bad_launch_config))]
    LaunchConfig {
        var: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("chain list must alternate grate and cage, got {0} names")]
    #[diagnostic(
        code(process::uneven_chain),
        help("Pass pairs: grate cage [grate cage ...]")
    )]
    UnevenChain(usize),

    #[error("chain depth {depth} exceeds the limit of {max}")]
    #[diagnostic(
        code(process::chain_too_deep),
        help("Raise LIND_MAX_CHAIN_DEPTH or shorten the chain.")
    )]
    ChainTooDeep { depth: u32, max: u32 },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Gate(#[from] GateError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Journal(#[from] JournalError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Registration(#[from] RegistrationError),
}

impl ProcessError {
    /// Leaf failures are confined to one child and only make its status non-zero
    pub fn is_leaf(&self) -> bool {
        matches!(
            self,
            Self::ImageReplacementFailed { .. } | Self::ChildSetupFailed { .. }
        )
    }
}

/// Exit code recorded for an image that could not be executed
pub const NOT_STARTED_CODE: i32 = 127;

/// What a managed process is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Cage,
    Grate,
    /// Plain program started by the simple runner
    Program,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Cage => write!(f, "cage"),
            Role::Grate => write!(f, "grate"),
            Role::Program => write!(f, "program"),
        }
    }
}

/// Lifecycle of a managed cage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CageState {
    Created,
    WaitingForSignal,
    Running,
    Exited,
}

impl CageState {
    pub fn can_transition_to(self, to: CageState) -> bool {
        use CageState::*;
        matches!(
            (self, to),
            (Created, WaitingForSignal)
                | (Created, Running)
                | (WaitingForSignal, Running)
                | (Created, Exited)
                | (WaitingForSignal, Exited)
                | (Running, Exited)
        )
    }

    pub fn transition(self, to: CageState) -> ProcessResult<CageState> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(ProcessError::InvalidStateTransition { from: self, to })
        }
    }
}

/// How a child ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Termination {
    Exited { code: i32 },
    Signaled { signal: i32 },
    /// Someone else already reaped it
    Vanished,
}

impl Termination {
    /// Classify a wait status; stop/continue notifications are not terminations
    pub fn from_wait_status(status: WaitStatus) -> Option<Self> {
        match status {
            WaitStatus::Exited(_, code) => Some(Self::Exited { code }),
            WaitStatus::Signaled(_, signal, _) => Some(Self::Signaled {
                signal: signal as i32,
            }),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exited { code: 0 } | Self::Vanished)
    }

    pub fn signal(&self) -> Option<Signal> {
        match self {
            Self::Signaled { signal } => Signal::try_from(*signal).ok(),
            _ => None,
        }
    }

    /// Shell-style status: the code, or 128 + signal number
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Exited { code } => *code,
            Self::Signaled { signal } => 128 + signal,
            Self::Vanished => 0,
        }
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited { code } => write!(f, "exited with code {code}"),
            Self::Signaled { signal } => match self.signal() {
                Some(sig) => write!(f, "terminated by signal {sig}"),
                None => write!(f, "terminated by signal {signal}"),
            },
            Self::Vanished => write!(f, "already reaped"),
        }
    }
}

/// One managed child
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProcessRecord {
    pub role: Role,
    pub image: String,
    pub pid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub termination: Option<Termination>,
}

impl ProcessRecord {
    pub fn new(role: Role, image: impl Into<String>, pid: u32) -> Self {
        Self {
            role,
            image: image.into(),
            pid,
            termination: None,
        }
    }

    /// Child whose image could not be executed; reported like a shell's exit 127
    pub fn not_started(role: Role, image: impl Into<String>) -> Self {
        Self {
            role,
            image: image.into(),
            pid: 0,
            termination: Some(Termination::Exited {
                code: NOT_STARTED_CODE,
            }),
        }
    }

    /// Whether a process ever existed behind this record
    pub fn was_started(&self) -> bool {
        self.pid != 0
    }

    pub fn succeeded(&self) -> bool {
        self.termination.map(|t| t.is_success()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::Pid;

    #[test]
    fn test_gated_lifecycle() {
        let state = CageState::Created
            .transition(CageState::WaitingForSignal)
            .and_then(|s| s.transition(CageState::Running))
            .and_then(|s| s.transition(CageState::Exited))
            .unwrap();
        assert_eq!(state, CageState::Exited);
    }

    #[test]
    fn test_no_way_back_to_waiting() {
        assert!(CageState::Running
            .transition(CageState::WaitingForSignal)
            .is_err());
        assert!(!CageState::Exited.can_transition_to(CageState::Running));
    }

    #[test]
    fn test_termination_classification() {
        let pid = Pid::from_raw(10);
        let exited = Termination::from_wait_status(WaitStatus::Exited(pid, 3)).unwrap();
        assert_eq!(exited.to_string(), "exited with code 3");
        assert!(!exited.is_success());

        let killed =
            Termination::from_wait_status(WaitStatus::Signaled(pid, Signal::SIGTERM, false))
                .unwrap();
        assert_eq!(killed.to_string(), "terminated by signal SIGTERM");
        assert_eq!(killed.exit_code(), 143);

        assert!(Termination::from_wait_status(WaitStatus::StillAlive).is_none());
        assert!(Termination::Vanished.is_success());
    }

    #[test]
    fn test_leaf_errors() {
        let leaf = ProcessError::ImageReplacementFailed {
            image: "missing".into(),
            source: std::io::Error::from_raw_os_error(Errno::ENOENT as i32),
        };
        assert!(leaf.is_leaf());
        assert!(!ProcessError::UnevenChain(3).is_leaf());
    }

    #[test]
    fn test_not_started_record_fails_with_127() {
        let record = ProcessRecord::not_started(Role::Program, "/nonexistent/prog");
        assert!(!record.was_started());
        assert!(!record.succeeded());
        assert_eq!(record.termination.map(|t| t.exit_code()), Some(NOT_STARTED_CODE));
        assert!(ProcessRecord::new(Role::Program, "p", 42).was_started());
    }
}
