/*!
 * Runtime Configuration
 * Environment-driven settings shared by the loader, grates and cages
 */

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

pub const ENV_STATE_DIR: &str = "LIND_STATE_DIR";
pub const ENV_READY_TIMEOUT_MS: &str = "LIND_READY_TIMEOUT_MS";
pub const ENV_ARM_TIMEOUT_MS: &str = "LIND_ARM_TIMEOUT_MS";
pub const ENV_MAX_CHAIN_DEPTH: &str = "LIND_MAX_CHAIN_DEPTH";

pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_ARM_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_CHAIN_DEPTH: u32 = 8;

const JOURNAL_FILE: &str = "registrations.journal";
const RENDEZVOUS_DIR: &str = "rendezvous";

#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum ConfigError {
    #[error("{var} must be an unsigned integer, got '{value}'")]
    #[diagnostic(code(config::invalid_number))]
    InvalidNumber { var: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    #[diagnostic(code(config::zero))]
    Zero(&'static str),
}

/// Settings for one orchestration session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RuntimeConfig {
    /// Directory holding the registration journal and rendezvous markers
    pub state_dir: PathBuf,
    /// How long the loader waits for a grate to report its registrations
    pub ready_timeout: Duration,
    /// How long a gated cage waits for its release signal
    pub arm_timeout: Duration,
    /// Grate levels a chained invocation may nest
    pub max_chain_depth: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            state_dir: std::env::temp_dir().join(format!("lind-{}", Uuid::new_v4())),
            ready_timeout: DEFAULT_READY_TIMEOUT,
            arm_timeout: DEFAULT_ARM_TIMEOUT,
            max_chain_depth: DEFAULT_MAX_CHAIN_DEPTH,
        }
    }
}

impl RuntimeConfig {
    /// Load from the process environment, falling back to defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load through an arbitrary lookup (lets tests avoid touching the real environment)
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup(ENV_STATE_DIR) {
            config.state_dir = PathBuf::from(dir);
        }
        if let Some(ms) = parse_u64(&lookup, ENV_READY_TIMEOUT_MS)? {
            config.ready_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_u64(&lookup, ENV_ARM_TIMEOUT_MS)? {
            config.arm_timeout = Duration::from_millis(ms);
        }
        if let Some(depth) = parse_u64(&lookup, ENV_MAX_CHAIN_DEPTH)? {
            if depth == 0 {
                return Err(ConfigError::Zero(ENV_MAX_CHAIN_DEPTH));
            }
            config.max_chain_depth = u32::try_from(depth).unwrap_or(u32::MAX);
        }

        Ok(config)
    }

    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn with_arm_timeout(mut self, timeout: Duration) -> Self {
        self.arm_timeout = timeout;
        self
    }

    pub fn with_max_chain_depth(mut self, depth: u32) -> Self {
        self.max_chain_depth = depth.max(1);
        self
    }

    pub fn journal_path(&self) -> PathBuf {
        journal_path_in(&self.state_dir)
    }

    pub fn rendezvous_dir(&self) -> PathBuf {
        self.state_dir.join(RENDEZVOUS_DIR)
    }

    /// Environment entries that hand this configuration down to child processes
    pub fn child_env(&self) -> Vec<(String, String)> {
        vec![
            (ENV_STATE_DIR.to_string(), self.state_dir.display().to_string()),
            (
                ENV_READY_TIMEOUT_MS.to_string(),
                self.ready_timeout.as_millis().to_string(),
            ),
            (
                ENV_ARM_TIMEOUT_MS.to_string(),
                self.arm_timeout.as_millis().to_string(),
            ),
            (
                ENV_MAX_CHAIN_DEPTH.to_string(),
                self.max_chain_depth.to_string(),
            ),
        ]
    }
}

pub fn journal_path_in(state_dir: &Path) -> PathBuf {
    state_dir.join(JOURNAL_FILE)
}

fn parse_u64<F>(lookup: &F, var: &'static str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber { var, value }),
    }
}
