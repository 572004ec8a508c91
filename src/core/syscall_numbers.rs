/*!
 * Syscall Numbers
 * Numbers understood by the interposition layer
 */

use super::types::SyscallNumber;

pub const OPEN: SyscallNumber = SyscallNumber::new(2);
pub const EXIT: SyscallNumber = SyscallNumber::new(30);
pub const GETPID: SyscallNumber = SyscallNumber::new(39);
pub const GETUID: SyscallNumber = SyscallNumber::new(50);
pub const GETEUID: SyscallNumber = SyscallNumber::new(51);

/// Reserved number carrying `register_handler` requests
pub const REGISTER_HANDLER: SyscallNumber = SyscallNumber::new(400);

/// Human-readable name for log lines
pub fn name_of(number: SyscallNumber) -> &'static str {
    match number {
        OPEN => "open",
        EXIT => "exit",
        GETPID => "getpid",
        GETUID => "getuid",
        GETEUID => "geteuid",
        REGISTER_HANDLER => "register_handler",
        _ => "unknown",
    }
}

/// Numbers that may never be intercepted
pub fn is_reserved(number: SyscallNumber) -> bool {
    number == REGISTER_HANDLER
}
