/*!
 * Lind Grates
 * Syscall interposition between cages and grates
 *
 * A grate registers handlers for (cage, syscall) pairs; intercepted calls from the
 * cage are dispatched by handler index into the grate's frozen handler table. The
 * process layer starts cages gated, releases them only after their grate is ready,
 * and can chain grate/cage pairs.
 */

pub mod cli;
pub mod core;
pub mod demo;
pub mod grate;
pub mod interpose;
pub mod monitoring;
pub mod process;
pub mod signals;

// Re-exports
pub use crate::core::{
    CageId, ConfigError, GrateId, HandlerIndex, LindError, LindResult, RuntimeConfig,
    SyscallNumber, Word,
};
pub use grate::{
    ArgumentVector, DispatchEntry, DispatchError, Dispatcher, HandlerTable, HandlerTableBuilder,
    DISPATCH_ERROR,
};
pub use interpose::{
    InterceptionTable, Registration, RegistrationClient, RegistrationError, SyscallChannel,
};
pub use monitoring::init_tracing;
pub use process::{ChainLoader, ChainPlan, Orchestrator, SessionConfig, SessionReport};
pub use signals::{ReadinessGate, Rendezvous};
