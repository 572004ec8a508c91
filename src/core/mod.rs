/*!
 * Core Module
 * Identifiers, syscall numbers, configuration and the umbrella error
 */

pub mod config;
pub mod errors;
pub mod syscall_numbers;
pub mod types;

// Re-export for convenience
pub use config::{ConfigError, RuntimeConfig};
pub use errors::{LindError, LindResult};
pub use types::{CageId, GrateId, HandlerIndex, SyscallNumber, Word};
