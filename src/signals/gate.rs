/*!
 * Readiness Gate
 * Cage-side half of the handshake: arm, then block until released
 *
 * The release handler is installed before the armed marker is written, so the
 * loader can never deliver the release signal into the default disposition.
 */

use super::rendezvous::Rendezvous;
use super::types::{GateError, GateResult, RELEASE_SIGNAL, STOP_SIGNAL};
use crate::core::types::CageId;
use std::time::{Duration, Instant};
use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::{debug, info};

pub struct ReadinessGate {
    rendezvous: Rendezvous,
    cage: CageId,
    arm_timeout: Duration,
}

impl ReadinessGate {
    pub fn new(rendezvous: Rendezvous, cage: CageId, arm_timeout: Duration) -> Self {
        Self {
            rendezvous,
            cage,
            arm_timeout,
        }
    }

    /// Install the release handler and announce the cage as armed.
    /// Must run inside a tokio runtime.
    pub fn arm(self) -> GateResult<ArmedGate> {
        let release = signal(SignalKind::user_defined1()).map_err(|source| GateError::Install {
            signal: RELEASE_SIGNAL,
            source,
        })?;
        self.rendezvous.mark_armed(self.cage)?;
        info!(cage = %self.cage, timeout_ms = self.arm_timeout.as_millis() as u64, "Cage armed, waiting for release");

        Ok(ArmedGate {
            release,
            cage: self.cage,
            arm_timeout: self.arm_timeout,
        })
    }
}

pub struct ArmedGate {
    release: Signal,
    cage: CageId,
    arm_timeout: Duration,
}

impl ArmedGate {
    pub fn cage(&self) -> CageId {
        self.cage
    }

    /// Resolve once the release signal arrives; returns how long the cage was held
    pub async fn released(mut self) -> GateResult<Duration> {
        let started = Instant::now();
        match tokio::time::timeout(self.arm_timeout, self.release.recv()).await {
            Ok(Some(())) => {
                let held = started.elapsed();
                debug!(cage = %self.cage, held_ms = held.as_millis() as u64, "Cage released");
                Ok(held)
            }
            Ok(None) => Err(GateError::Install {
                signal: RELEASE_SIGNAL,
                source: std::io::Error::other("release signal stream closed"),
            }),
            Err(_) => Err(GateError::Timeout {
                what: format!("release of {}", self.cage),
                waited: self.arm_timeout,
            }),
        }
    }
}

/// Listener for the grate stop signal. Must run inside a tokio runtime.
pub fn stop_listener() -> GateResult<Signal> {
    signal(SignalKind::terminate()).map_err(|source| GateError::Install {
        signal: STOP_SIGNAL,
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::raise;
    use serial_test::serial;

    #[tokio::test]
    #[serial]
    async fn test_gate_opens_on_release_signal() {
        let dir = tempfile::tempdir().unwrap();
        let rv = Rendezvous::new(dir.path());
        let cage = CageId::new(77);

        let armed = ReadinessGate::new(rv.clone(), cage, Duration::from_secs(5))
            .arm()
            .unwrap();
        assert!(rv.is_armed(cage));

        raise(RELEASE_SIGNAL).unwrap();
        armed.released().await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn test_gate_times_out_without_release() {
        let dir = tempfile::tempdir().unwrap();
        let armed = ReadinessGate::new(
            Rendezvous::new(dir.path()),
            CageId::new(78),
            Duration::from_millis(50),
        )
        .arm()
        .unwrap();

        assert!(matches!(
            armed.released().await,
            Err(GateError::Timeout { .. })
        ));
    }
}
