/*!
 * Interposition Module
 * Registration of (cage, syscall) pairs and routing of intercepted calls
 */

pub mod client;
pub mod journal;
pub mod loopback;
pub mod native;
pub mod table;
pub mod types;

pub use client::{RegistrationClient, SyscallChannel};
pub use journal::{JournalChannel, JournalError, JournalRecord, JournalWriter, RegistrationJournal};
pub use loopback::{GrateCatalog, LoopbackChannel, LoopbackRuntime};
pub use native::{HostSyscalls, NativeSyscalls, Unsupported};
pub use table::{CageChannel, InterceptionTable};
pub use types::{
    AuditEvent, Binding, Registration, RegistrationError, RegistrationOutcome, NOTUSED,
    REGISTER_OK,
};
