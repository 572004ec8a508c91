/*!
 * Signal Types
 * Signals used by the readiness handshake and the errors it can raise
 */

use miette::Diagnostic;
use nix::sys::signal::Signal;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Releases a gated cage once its grate is ready
pub const RELEASE_SIGNAL: Signal = Signal::SIGUSR1;

/// Stops a grate after its cage has exited
pub const STOP_SIGNAL: Signal = Signal::SIGTERM;

/// Gate operation result
pub type GateResult<T> = Result<T, GateError>;

#[derive(Error, Debug, Diagnostic)]
pub enum GateError {
    #[error("timed out after {waited:?} waiting for {what}")]
    #[diagnostic(
        code(gate::timeout),
        help("Raise LIND_READY_TIMEOUT_MS or LIND_ARM_TIMEOUT_MS if the peer is merely slow.")
    )]
    Timeout { what: String, waited: Duration },

    #[error("{peer} went away before {what}")]
    #[diagnostic(code(gate::peer_exited))]
    PeerExited { what: String, peer: String },

    #[error("rendezvous I/O failed on {path}: {source}")]
    #[diagnostic(code(gate::io))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed marker {path}: {source}")]
    #[diagnostic(code(gate::malformed_marker))]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("could not install handler for {signal}: {source}")]
    #[diagnostic(code(gate::install))]
    Install {
        signal: Signal,
        #[source]
        source: std::io::Error,
    },

    #[error("operator input closed before acknowledgment")]
    #[diagnostic(code(gate::operator_closed))]
    OperatorClosed,
}
