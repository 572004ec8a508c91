/*!
 * Rendezvous
 * Marker-file handshake between the loader, its grate and its gated cage
 *
 * Markers:
 * - `cage-<id>.armed`: the cage installed its release handler and is blocked
 * - `grate-<id>.ready`: the grate finished every registration it intends to make
 * - `cage-<id>.outcome.json`: what the cage's real logic observed
 *
 * Markers are written to a temporary name and renamed into place, so a reader never
 * sees a half-written file.
 */

use super::types::{GateError, GateResult};
use crate::core::types::{CageId, GrateId, SyscallNumber};
use crate::interpose::Registration;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

const POLL_FLOOR: Duration = Duration::from_millis(1);
const POLL_CEILING: Duration = Duration::from_millis(50);

/// Written by a grate once its registrations are in place
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyMarker {
    pub grate: GrateId,
    pub target_cage: CageId,
    pub registrations: Vec<Registration>,
}

/// One call made by a cage's real logic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRecord {
    pub syscall: SyscallNumber,
    pub name: String,
    pub ret: i64,
    pub thread: usize,
}

/// Everything a cage observed, for the loader and for tests
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CageOutcome {
    pub cage: CageId,
    pub calls: Vec<CallRecord>,
}

impl CageOutcome {
    pub fn returns_of(&self, syscall: SyscallNumber) -> Vec<i64> {
        self.calls
            .iter()
            .filter(|c| c.syscall == syscall)
            .map(|c| c.ret)
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct Rendezvous {
    dir: PathBuf,
}

impl Rendezvous {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ensure(&self) -> GateResult<()> {
        fs::create_dir_all(&self.dir).map_err(|source| GateError::Io {
            path: self.dir.clone(),
            source,
        })
    }

    pub fn armed_path(&self, cage: CageId) -> PathBuf {
        self.dir.join(format!("cage-{}.armed", cage.as_raw()))
    }

    pub fn ready_path(&self, grate: GrateId) -> PathBuf {
        self.dir.join(format!("grate-{}.ready", grate.as_raw()))
    }

    pub fn outcome_path(&self, cage: CageId) -> PathBuf {
        self.dir.join(format!("cage-{}.outcome.json", cage.as_raw()))
    }

    pub fn mark_armed(&self, cage: CageId) -> GateResult<()> {
        write_atomic(&self.armed_path(cage), cage.as_raw().to_string().as_bytes())?;
        debug!(cage = %cage, "Armed marker written");
        Ok(())
    }

    pub fn mark_ready(&self, marker: &ReadyMarker) -> GateResult<()> {
        let path = self.ready_path(marker.grate);
        write_json(&path, marker)?;
        info!(
            grate = %marker.grate,
            cage = %marker.target_cage,
            registrations = marker.registrations.len(),
            "Grate ready"
        );
        Ok(())
    }

    pub fn write_outcome(&self, outcome: &CageOutcome) -> GateResult<()> {
        write_json(&self.outcome_path(outcome.cage), outcome)
    }

    pub fn is_armed(&self, cage: CageId) -> bool {
        self.armed_path(cage).exists()
    }

    pub fn is_ready(&self, grate: GrateId) -> bool {
        self.ready_path(grate).exists()
    }

    pub fn read_ready(&self, grate: GrateId) -> GateResult<Option<ReadyMarker>> {
        read_json(&self.ready_path(grate))
    }

    pub fn read_outcome(&self, cage: CageId) -> GateResult<Option<CageOutcome>> {
        read_json(&self.outcome_path(cage))
    }

    /// Block until `cage` is armed. `alive` is polled so a dead cage fails fast.
    pub fn wait_armed(
        &self,
        cage: CageId,
        timeout: Duration,
        alive: &mut dyn FnMut() -> bool,
    ) -> GateResult<()> {
        poll_until(&format!("{cage} to arm"), &cage.to_string(), timeout, alive, || {
            Ok(self.is_armed(cage).then_some(()))
        })
    }

    /// Block until `grate` reports ready, returning its marker
    pub fn wait_ready(
        &self,
        grate: GrateId,
        timeout: Duration,
        alive: &mut dyn FnMut() -> bool,
    ) -> GateResult<ReadyMarker> {
        poll_until(
            &format!("{grate} to become ready"),
            &grate.to_string(),
            timeout,
            alive,
            || self.read_ready(grate),
        )
    }
}

/// Decides when the loader may release a gated cage
pub trait ReadinessProbe: Send {
    fn await_ready(
        &mut self,
        grate: GrateId,
        timeout: Duration,
        alive: &mut dyn FnMut() -> bool,
    ) -> GateResult<ReadyMarker>;
}

impl ReadinessProbe for Rendezvous {
    fn await_ready(
        &mut self,
        grate: GrateId,
        timeout: Duration,
        alive: &mut dyn FnMut() -> bool,
    ) -> GateResult<ReadyMarker> {
        self.wait_ready(grate, timeout, alive)
    }
}

/// Rendezvous followed by an operator's Enter key, both within one timeout
pub struct OperatorAck {
    rendezvous: Rendezvous,
    lines: flume::Receiver<String>,
}

impl OperatorAck {
    /// Acknowledge from stdin. The reader thread is detached; it ends with stdin.
    pub fn stdin(rendezvous: Rendezvous) -> Self {
        let (tx, rx) = flume::bounded(1);
        thread::spawn(move || {
            let stdin = std::io::stdin();
            let mut line = String::new();
            while stdin.read_line(&mut line).map(|n| n > 0).unwrap_or(false) {
                if tx.send(std::mem::take(&mut line)).is_err() {
                    break;
                }
            }
        });
        Self::from_receiver(rendezvous, rx)
    }

    pub fn from_receiver(rendezvous: Rendezvous, lines: flume::Receiver<String>) -> Self {
        Self { rendezvous, lines }
    }
}

impl ReadinessProbe for OperatorAck {
    fn await_ready(
        &mut self,
        grate: GrateId,
        timeout: Duration,
        alive: &mut dyn FnMut() -> bool,
    ) -> GateResult<ReadyMarker> {
        let started = Instant::now();
        let marker = self.rendezvous.wait_ready(grate, timeout, alive)?;

        info!(grate = %grate, "Press Enter to release the cage");
        let remaining = timeout.saturating_sub(started.elapsed());
        match self.lines.recv_timeout(remaining) {
            Ok(_) => Ok(marker),
            Err(flume::RecvTimeoutError::Timeout) => Err(GateError::Timeout {
                what: "operator acknowledgment".to_string(),
                waited: timeout,
            }),
            Err(flume::RecvTimeoutError::Disconnected) => Err(GateError::OperatorClosed),
        }
    }
}

fn poll_until<T>(
    what: &str,
    peer: &str,
    timeout: Duration,
    alive: &mut dyn FnMut() -> bool,
    mut check: impl FnMut() -> GateResult<Option<T>>,
) -> GateResult<T> {
    let started = Instant::now();
    let mut delay = POLL_FLOOR;

    loop {
        if let Some(found) = check()? {
            debug!(what, waited_ms = started.elapsed().as_millis() as u64, "Rendezvous reached");
            return Ok(found);
        }
        if !alive() {
            // One last look: the peer may have finished right before exiting
            if let Some(found) = check()? {
                return Ok(found);
            }
            return Err(GateError::PeerExited {
                what: what.to_string(),
                peer: peer.to_string(),
            });
        }
        if started.elapsed() >= timeout {
            return Err(GateError::Timeout {
                what: what.to_string(),
                waited: timeout,
            });
        }
        thread::sleep(delay);
        delay = (delay * 2).min(POLL_CEILING);
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> GateResult<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    fs::write(&tmp, bytes)
        .and_then(|_| fs::rename(&tmp, path))
        .map_err(|source| GateError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> GateResult<()> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| GateError::Malformed {
        path: path.to_path_buf(),
        source,
    })?;
    write_atomic(path, &bytes)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> GateResult<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(GateError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| GateError::Malformed {
            path: path.to_path_buf(),
            source,
        })
}
