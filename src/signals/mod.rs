/*!
 * Signals Module
 * Readiness handshake between loader, grate and gated cage
 */

pub mod gate;
pub mod rendezvous;
pub mod types;

pub use gate::{stop_listener, ArmedGate, ReadinessGate};
pub use rendezvous::{CageOutcome, CallRecord, OperatorAck, ReadinessProbe, ReadyMarker, Rendezvous};
pub use types::{GateError, GateResult, RELEASE_SIGNAL, STOP_SIGNAL};
