/*!
 * Native Fallback
 * What an un-intercepted call resolves to
 */

use crate::core::syscall_numbers::{GETEUID, GETPID, GETUID};
use crate::core::types::{CageId, SyscallNumber};
use crate::grate::ArgumentVector;
use nix::errno::Errno;
use nix::unistd;

/// Implementation of calls nobody intercepted
pub trait NativeSyscalls: Send + Sync {
    fn invoke(&self, caller: CageId, number: SyscallNumber, args: &ArgumentVector) -> i64;
}

/// Answers every call with `-ENOSYS`
#[derive(Debug, Default, Clone, Copy)]
pub struct Unsupported;

impl NativeSyscalls for Unsupported {
    fn invoke(&self, _caller: CageId, _number: SyscallNumber, _args: &ArgumentVector) -> i64 {
        -(Errno::ENOSYS as i64)
    }
}

/// Identity calls answered by the host kernel
#[derive(Debug, Default, Clone, Copy)]
pub struct HostSyscalls;

impl NativeSyscalls for HostSyscalls {
    fn invoke(&self, _caller: CageId, number: SyscallNumber, _args: &ArgumentVector) -> i64 {
        match number {
            GETUID => unistd::getuid().as_raw() as i64,
            GETEUID => unistd::geteuid().as_raw() as i64,
            GETPID => unistd::getpid().as_raw() as i64,
            _ => -(Errno::ENOSYS as i64),
        }
    }
}
