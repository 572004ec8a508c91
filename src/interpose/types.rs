/*!
 * Interposition Types
 * Registrations, bindings and the status contract of register_handler
 */

use crate::core::types::{CageId, GrateId, HandlerIndex, SyscallNumber, Word};
use miette::Diagnostic;
use nix::errno::Errno;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Placeholder for unused argument words
pub const NOTUSED: Word = 0xdead_beef_dead_beef;

/// Status word reported for a successful registration
pub const REGISTER_OK: i64 = 0;

/// Bind (target_cage, syscall) to handler `handler` inside `grate`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Registration {
    pub target_cage: CageId,
    pub syscall: SyscallNumber,
    pub handler: HandlerIndex,
    pub grate: GrateId,
}

impl Registration {
    pub const fn new(
        target_cage: CageId,
        syscall: SyscallNumber,
        handler: HandlerIndex,
        grate: GrateId,
    ) -> Self {
        Self {
            target_cage,
            syscall,
            handler,
            grate,
        }
    }

    /// Argument words of the register_handler call
    pub const fn to_words(&self) -> [Word; 6] {
        [
            self.target_cage.as_raw(),
            self.syscall.as_raw(),
            self.handler.as_raw(),
            self.grate.as_raw(),
            NOTUSED,
            NOTUSED,
        ]
    }

    pub const fn from_words(words: [Word; 6]) -> Self {
        Self {
            target_cage: CageId::new(words[0]),
            syscall: SyscallNumber::new(words[1]),
            handler: HandlerIndex::new(words[2]),
            grate: GrateId::new(words[3]),
        }
    }

    pub const fn binding(&self) -> Binding {
        Binding {
            handler: self.handler,
            grate: self.grate,
        }
    }
}

/// Where an intercepted call goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Binding {
    pub handler: HandlerIndex,
    pub grate: GrateId,
}

/// Effect of an accepted registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "previous", rename_all = "snake_case")]
pub enum RegistrationOutcome {
    /// No binding existed for the pair
    Installed,
    /// Last writer wins: the prior binding was overwritten
    Replaced(Binding),
    /// The exact same binding was already active
    Unchanged,
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum RegistrationError {
    #[error("registration names an invalid id: {0:?}")]
    #[diagnostic(
        code(registration::invalid),
        help("Cage and grate ids are positive process ids.")
    )]
    Invalid(Registration),

    #[error("syscall {0} is reserved and cannot be intercepted")]
    #[diagnostic(code(registration::reserved))]
    Reserved(SyscallNumber),

    #[error("{0} has already exited")]
    #[diagnostic(
        code(registration::exited),
        help("Registrations must be issued while both the cage and the grate are alive.")
    )]
    Exited(CageId),

    #[error("channel cannot carry registrations")]
    #[diagnostic(code(registration::unsupported))]
    Unsupported,

    #[error("registration could not be recorded")]
    #[diagnostic(code(registration::io))]
    Io,

    #[error("registration rejected with status {0}")]
    #[diagnostic(code(registration::rejected))]
    Rejected(i64),
}

impl RegistrationError {
    /// Negative errno status word for the wire
    pub fn to_status(&self) -> i64 {
        let errno = match self {
            Self::Invalid(_) | Self::Reserved(_) => Errno::EINVAL,
            Self::Exited(_) => Errno::ESRCH,
            Self::Unsupported => Errno::ENOSYS,
            Self::Io => Errno::EIO,
            Self::Rejected(status) => return *status,
        };
        -(errno as i64)
    }

    /// Decode a status word; `None` means success
    pub fn from_status(status: i64, registration: Registration) -> Option<Self> {
        if status == REGISTER_OK {
            return None;
        }
        let errno = status.checked_neg().unwrap_or(0);
        let error = if errno == Errno::EINVAL as i64 {
            if syscall_is_reserved(registration.syscall) {
                Self::Reserved(registration.syscall)
            } else {
                Self::Invalid(registration)
            }
        } else if errno == Errno::ESRCH as i64 {
            Self::Exited(registration.target_cage)
        } else if errno == Errno::ENOSYS as i64 {
            Self::Unsupported
        } else if errno == Errno::EIO as i64 {
            Self::Io
        } else {
            Self::Rejected(status)
        };
        Some(error)
    }
}

fn syscall_is_reserved(number: SyscallNumber) -> bool {
    crate::core::syscall_numbers::is_reserved(number)
}

/// Audit trail of every change to the interception table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    Installed {
        registration: Registration,
    },
    Replaced {
        registration: Registration,
        previous: Binding,
    },
    Revoked {
        cage: CageId,
        syscall: SyscallNumber,
        binding: Binding,
    },
    GrateDetached {
        grate: GrateId,
        removed: usize,
    },
    CageExited {
        cage: CageId,
        removed: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Registration {
        Registration::new(
            CageId::new(7),
            SyscallNumber::new(50),
            HandlerIndex::new(1),
            GrateId::new(3),
        )
    }

    #[test]
    fn test_words_carry_four_fields() {
        let words = sample().to_words();
        assert_eq!(&words[..4], &[7, 50, 1, 3]);
        assert_eq!(words[4], NOTUSED);
        assert_eq!(Registration::from_words(words), sample());
    }

    #[test]
    fn test_status_contract() {
        assert_eq!(RegistrationError::from_status(0, sample()), None);
        let exited = RegistrationError::Exited(CageId::new(7));
        assert_eq!(exited.to_status(), -(Errno::ESRCH as i64));
        assert_eq!(
            RegistrationError::from_status(exited.to_status(), sample()),
            Some(exited)
        );
        assert_eq!(
            RegistrationError::from_status(-9999, sample()),
            Some(RegistrationError::Rejected(-9999))
        );
    }
}
