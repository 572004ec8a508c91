/*!
 * Launch Configuration
 * Typed process-creation parameters handed to children through the environment
 */

use super::types::{ProcessError, ProcessResult};
use crate::core::config::RuntimeConfig;
use crate::core::types::CageId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// First argument of a cage that must wait for its release signal
pub const GATED_TOKEN: &str = "wait";

pub const ENV_CAGE_LAUNCH: &str = "LIND_CAGE_LAUNCH";
pub const ENV_GRATE_LAUNCH: &str = "LIND_GRATE_LAUNCH";

/// Grate nesting level of a chained invocation (top-level grate is 1)
pub const ENV_CHAIN_DEPTH: &str = "LIND_CHAIN_DEPTH";

/// An executable and its arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSpec {
    pub program: PathBuf,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

impl ImageSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Same image with `token` inserted as the first argument
    pub fn with_leading_arg(&self, token: &str) -> Self {
        let mut args = Vec::with_capacity(self.args.len() + 1);
        args.push(token.to_string());
        args.extend(self.args.iter().cloned());
        Self {
            program: self.program.clone(),
            args,
        }
    }

    /// Label for logs and records
    pub fn name(&self) -> String {
        self.program.display().to_string()
    }
}

/// JSON-in-environment encoding shared by the launch types
pub trait LaunchConfig: Serialize + DeserializeOwned {
    const VAR: &'static str;

    fn to_env(&self) -> ProcessResult<(String, String)> {
        let json = serde_json::to_string(self).map_err(|source| ProcessError::LaunchConfig {
            var: Self::VAR,
            source,
        })?;
        Ok((Self::VAR.to_string(), json))
    }

    fn from_env_value(value: &str) -> ProcessResult<Self> {
        serde_json::from_str(value).map_err(|source| ProcessError::LaunchConfig {
            var: Self::VAR,
            source,
        })
    }

    /// `None` when the variable is absent
    fn from_env() -> ProcessResult<Option<Self>> {
        match std::env::var(Self::VAR) {
            Ok(value) => Self::from_env_value(&value).map(Some),
            Err(_) => Ok(None),
        }
    }
}

/// Handed to a cage by the loader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CageLaunch {
    pub gated: bool,
    pub runtime: RuntimeConfig,
}

impl LaunchConfig for CageLaunch {
    const VAR: &'static str = ENV_CAGE_LAUNCH;
}

/// Handed to a grate by the loader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrateLaunch {
    pub target_cage: CageId,
    pub runtime: RuntimeConfig,
}

impl LaunchConfig for GrateLaunch {
    const VAR: &'static str = ENV_GRATE_LAUNCH;
}
