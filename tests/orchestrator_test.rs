/*!
 * Orchestrator Tests
 * Gated sessions driven end to end through the lind-cage and lind-grate binaries
 */

use lind_grates::core::syscall_numbers::{GETEUID, GETUID};
use lind_grates::demo::{EUID_GRATE_VAL, UID_GRATE_VAL};
use lind_grates::process::{
    CageState, ImageSpec, Orchestrator, ProcessError, Termination, NOT_STARTED_CODE,
};
use lind_grates::signals::{GateError, ReadinessProbe, ReadyMarker, Rendezvous};
use lind_grates::{GrateId, RuntimeConfig};
use pretty_assertions::assert_eq;
use serial_test::serial;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn cage_image() -> ImageSpec {
    ImageSpec::new(env!("CARGO_BIN_EXE_lind-cage"))
}

fn grate_image() -> ImageSpec {
    ImageSpec::new(env!("CARGO_BIN_EXE_lind-grate"))
}

fn config(dir: &tempfile::TempDir) -> RuntimeConfig {
    RuntimeConfig::default()
        .with_state_dir(dir.path())
        .with_ready_timeout(Duration::from_secs(10))
        .with_arm_timeout(Duration::from_secs(10))
}

/// Rendezvous probe that records whether any cage logic ran before release
struct WatchingProbe {
    inner: Rendezvous,
    early_outcome: Arc<AtomicBool>,
}

impl ReadinessProbe for WatchingProbe {
    fn await_ready(
        &mut self,
        grate: GrateId,
        timeout: Duration,
        alive: &mut dyn FnMut() -> bool,
    ) -> Result<ReadyMarker, GateError> {
        let marker = self.inner.wait_ready(grate, timeout, alive)?;
        // Give a misbehaving cage time to run ahead
        std::thread::sleep(Duration::from_millis(100));
        let early = std::fs::read_dir(self.inner.dir())
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .any(|e| e.file_name().to_string_lossy().ends_with(".outcome.json"))
            })
            .unwrap_or(false);
        self.early_outcome.store(early, Ordering::SeqCst);
        Ok(marker)
    }
}

#[test]
#[serial]
fn test_session_routes_getuid_to_grate() {
    let dir = tempfile::tempdir().unwrap();
    let mut orchestrator = Orchestrator::new(config(&dir));

    let report = orchestrator
        .run_session(&cage_image(), &grate_image())
        .unwrap();

    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.cage.termination, Some(Termination::Exited { code: 0 }));
    assert_eq!(
        report.cage_states,
        vec![
            CageState::Created,
            CageState::WaitingForSignal,
            CageState::Running,
            CageState::Exited
        ]
    );
    assert_eq!(report.registrations.len(), 2);
    assert!(report
        .registrations
        .iter()
        .all(|r| r.target_cage.as_raw() == report.cage.pid as u64));

    let outcome = report.outcome.expect("cage wrote its outcome");
    assert_eq!(outcome.returns_of(GETUID), vec![UID_GRATE_VAL]);
    assert_eq!(outcome.returns_of(GETEUID), vec![EUID_GRATE_VAL]);
}

#[test]
#[serial]
fn test_cage_logic_waits_for_release() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir);
    let early = Arc::new(AtomicBool::new(true));
    let probe = WatchingProbe {
        inner: Rendezvous::new(config.rendezvous_dir()),
        early_outcome: Arc::clone(&early),
    };

    let mut orchestrator = Orchestrator::with_probe(config, Box::new(probe));
    let report = orchestrator
        .run_session(&cage_image().with_args(["--threads", "2"]), &grate_image())
        .unwrap();

    assert!(!early.load(Ordering::SeqCst));
    let outcome = report.outcome.unwrap();
    // Real logic ran exactly once, from both threads
    assert_eq!(outcome.returns_of(GETUID), vec![UID_GRATE_VAL; 2]);
}

#[test]
#[serial]
fn test_grate_that_never_registers_aborts_session() {
    let dir = tempfile::tempdir().unwrap();
    let mut orchestrator = Orchestrator::new(config(&dir).with_ready_timeout(Duration::from_secs(2)));

    let silent_grate = ImageSpec::new("/bin/sh").with_args(["-c", "exit 0"]);
    let err = orchestrator
        .run_session(&cage_image(), &silent_grate)
        .unwrap_err();
    assert!(matches!(err, ProcessError::Gate(GateError::PeerExited { .. })));

    // The gated cage was torn down, never released
    assert_eq!(orchestrator.executor().running(), 0);
    let cage = orchestrator
        .executor()
        .records()
        .into_iter()
        .find(|r| r.image.ends_with("lind-cage"))
        .unwrap();
    assert_eq!(
        cage.termination.and_then(|t| t.signal()),
        Some(nix::sys::signal::Signal::SIGKILL)
    );
}

#[test]
#[serial]
fn test_missing_cage_image_fails_startup() {
    let dir = tempfile::tempdir().unwrap();
    let mut orchestrator = Orchestrator::new(config(&dir));
    let err = orchestrator
        .run_session(&ImageSpec::new("/nonexistent/cage"), &grate_image())
        .unwrap_err();
    assert!(err.is_leaf());
    assert_eq!(orchestrator.executor().running(), 0);
}

#[test]
#[serial]
fn test_run_programs_reports_every_status() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = Orchestrator::new(config(&dir));
    let records = orchestrator
        .run_programs(&[
            ImageSpec::new("/bin/sh").with_args(["-c", "exit 0"]),
            ImageSpec::new("/bin/sh").with_args(["-c", "exit 5"]),
            ImageSpec::new("/bin/sh").with_args(["-c", "kill -TERM $$"]),
        ])
        .unwrap();

    assert_eq!(records.len(), 3);
    let mut statuses: Vec<String> = records
        .iter()
        .map(|r| r.termination.unwrap().to_string())
        .collect();
    statuses.sort();
    assert_eq!(
        statuses,
        vec![
            "exited with code 0",
            "exited with code 5",
            "terminated by signal SIGTERM"
        ]
    );
}

#[test]
#[serial]
fn test_run_programs_reports_unstartable_image() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = Orchestrator::new(config(&dir));
    let images = [
        ImageSpec::new("/bin/sh").with_args(["-c", "exit 0"]),
        ImageSpec::new("/nonexistent/prog"),
    ];
    let records = orchestrator.run_programs(&images).unwrap();

    assert_eq!(records.len(), images.len());
    assert!(records[0].succeeded());
    assert_eq!(records[1].image, "/nonexistent/prog");
    assert!(!records[1].was_started());
    assert_eq!(
        records[1].termination,
        Some(Termination::Exited {
            code: NOT_STARTED_CODE
        })
    );
    assert_eq!(
        records[1].termination.unwrap().to_string(),
        "exited with code 127"
    );
}
