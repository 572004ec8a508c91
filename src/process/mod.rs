/*!
 * Process Module
 * Spawning, gating and reaping of cages and grates
 */

pub mod chain;
pub mod executor;
pub mod launch;
pub mod orchestrator;
pub mod types;

// Re-export for convenience
pub use chain::{chain_depth_from_env, ChainLink, ChainLoader, ChainPlan, ChainReport};
pub use executor::{PreExecHook, ProcessExecutor};
pub use launch::{
    CageLaunch, GrateLaunch, ImageSpec, LaunchConfig, ENV_CAGE_LAUNCH, ENV_CHAIN_DEPTH,
    ENV_GRATE_LAUNCH, GATED_TOKEN,
};
pub use orchestrator::{Orchestrator, SessionConfig, SessionReport};
pub use types::{
    CageState, ProcessError, ProcessRecord, ProcessResult, Role, Termination, NOT_STARTED_CODE,
};
