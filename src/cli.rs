/*!
 * Command Line
 * clap definitions for grate-loader, lind-grate and lind-cage
 */

use crate::core::config::{ConfigError, RuntimeConfig};
use crate::process::{ImageSpec, SessionConfig, GATED_TOKEN};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Overrides shared by every binary; each falls back to the LIND_* environment
#[derive(Debug, Args, Clone, Default)]
pub struct RuntimeArgs {
    /// Directory for the registration journal and rendezvous markers
    #[arg(long, global = true, value_name = "DIR")]
    pub state_dir: Option<PathBuf>,

    /// How long to wait for a grate to finish registering
    #[arg(long, global = true, value_name = "MS")]
    pub ready_timeout_ms: Option<u64>,

    /// How long a gated cage waits for release
    #[arg(long, global = true, value_name = "MS")]
    pub arm_timeout_ms: Option<u64>,

    /// Maximum grate nesting for chains
    #[arg(long, global = true, value_name = "N")]
    pub max_chain_depth: Option<u32>,
}

impl RuntimeArgs {
    /// Environment first, flags on top
    pub fn runtime_config(&self) -> Result<RuntimeConfig, ConfigError> {
        let mut config = RuntimeConfig::from_env()?;
        if let Some(dir) = &self.state_dir {
            config = config.with_state_dir(dir);
        }
        if let Some(ms) = self.ready_timeout_ms {
            config = config.with_ready_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.arm_timeout_ms {
            config = config.with_arm_timeout(Duration::from_millis(ms));
        }
        if let Some(depth) = self.max_chain_depth {
            if depth == 0 {
                return Err(ConfigError::Zero("--max-chain-depth"));
            }
            config = config.with_max_chain_depth(depth);
        }
        Ok(config)
    }
}

#[derive(Debug, Parser, Clone)]
#[command(name = "grate-loader", version, about = "Start cages under syscall-intercepting grates")]
pub struct LoaderCli {
    #[command(flatten)]
    pub runtime: RuntimeArgs,

    #[command(subcommand)]
    pub command: LoaderCommand,
}

#[derive(Debug, Subcommand, Clone)]
pub enum LoaderCommand {
    /// Run one gated cage under one grate
    Session {
        /// Also wait for Enter on stdin before releasing the cage
        #[arg(long)]
        operator_ack: bool,

        /// Cage executable
        cage: PathBuf,

        /// Grate executable
        grate: PathBuf,

        /// Extra arguments for the cage, after `--`
        #[arg(last = true)]
        cage_args: Vec<String>,
    },

    /// Alternating grate/cage executables; each grate starts the next pair
    ///
    /// Example:
    ///   grate-loader chain lind-grate lind-cage lind-grate lind-cage
    Chain {
        #[arg(value_name = "IMAGE", required = true, num_args = 1..)]
        images: Vec<String>,
    },

    /// Start each program, wait for all of them and report their statuses
    Run {
        #[arg(value_name = "PROGRAM", required = true, num_args = 1..)]
        programs: Vec<String>,
    },
}

impl LoaderCommand {
    pub fn session_config(&self) -> Option<SessionConfig> {
        match self {
            LoaderCommand::Session {
                operator_ack,
                cage,
                grate,
                cage_args,
            } => Some(SessionConfig {
                cage: ImageSpec::new(cage).with_args(cage_args.iter().cloned()),
                grate: ImageSpec::new(grate),
                operator_ack: *operator_ack,
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Parser, Clone)]
#[command(name = "lind-grate", about = "Demo grate: intercepts getuid and geteuid")]
pub struct GrateCli {
    #[command(flatten)]
    pub runtime: RuntimeArgs,

    /// Chain mode: cage [next-grate next-cage ...]
    #[arg(value_name = "IMAGE")]
    pub chain: Vec<String>,
}

#[derive(Debug, Parser, Clone)]
#[command(name = "lind-cage", about = "Demo cage: calls getuid and geteuid")]
pub struct CageCli {
    #[command(flatten)]
    pub runtime: RuntimeArgs,

    /// Worker threads issuing the calls
    #[arg(long, default_value_t = 1)]
    pub threads: usize,

    /// `wait` holds the cage at the readiness gate
    #[arg(value_name = "TOKEN")]
    pub rest: Vec<String>,
}

impl CageCli {
    pub fn gated(&self) -> bool {
        self.rest.first().map(String::as_str) == Some(GATED_TOKEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_parses_cage_args() {
        let cli = LoaderCli::parse_from([
            "grate-loader",
            "--ready-timeout-ms",
            "250",
            "session",
            "/bin/cage",
            "/bin/grate",
            "--",
            "--threads",
            "2",
        ]);
        let session = cli.command.session_config().unwrap();
        assert_eq!(session.cage.args, vec!["--threads", "2"]);
        assert!(!session.operator_ack);
        assert_eq!(cli.runtime.ready_timeout_ms, Some(250));
    }

    #[test]
    fn test_chain_requires_images() {
        assert!(LoaderCli::try_parse_from(["grate-loader", "chain"]).is_err());
        let cli = LoaderCli::parse_from(["grate-loader", "chain", "g", "c"]);
        assert!(matches!(cli.command, LoaderCommand::Chain { ref images } if images.len() == 2));
    }

    #[test]
    fn test_cage_gate_token() {
        assert!(CageCli::parse_from(["lind-cage", "wait"]).gated());
        assert!(!CageCli::parse_from(["lind-cage", "--threads", "2"]).gated());
    }

    #[test]
    fn test_zero_depth_flag_rejected() {
        let args = RuntimeArgs {
            max_chain_depth: Some(0),
            ..Default::default()
        };
        assert!(args.runtime_config().is_err());
    }
}
