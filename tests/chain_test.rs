/*!
 * Chain Tests
 * grate/cage chains where each grate starts the next pair
 */

use lind_grates::core::syscall_numbers::GETEUID;
use lind_grates::demo::{chain_interceptions, EUID_GRATE_VAL};
use lind_grates::interpose::{JournalRecord, RegistrationJournal};
use lind_grates::process::{ChainLoader, ChainPlan, ProcessError};
use lind_grates::signals::{CageOutcome, Rendezvous};
use lind_grates::RuntimeConfig;
use pretty_assertions::assert_eq;
use serial_test::serial;
use std::collections::HashSet;
use std::path::Path;

const GRATE: &str = env!("CARGO_BIN_EXE_lind-grate");
const CAGE: &str = env!("CARGO_BIN_EXE_lind-cage");

fn outcomes(dir: &Path) -> Vec<CageOutcome> {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().ends_with(".outcome.json"))
        .map(|e| serde_json::from_slice(&std::fs::read(e.path()).unwrap()).unwrap())
        .collect()
}

#[test]
#[serial]
fn test_two_link_chain_registers_both_cages() {
    let dir = tempfile::tempdir().unwrap();
    let config = RuntimeConfig::default().with_state_dir(dir.path());
    let loader = ChainLoader::new(config.clone(), chain_interceptions());

    let plan = ChainPlan::parse(&[GRATE, CAGE, GRATE, CAGE]).unwrap();
    let report = loader.launch(&plan).unwrap();
    assert_eq!(report.exit_code(), 0, "report: {report:?}");

    let registrations: Vec<_> = RegistrationJournal::new(config.journal_path())
        .read_all()
        .unwrap()
        .into_iter()
        .filter_map(|record| match record {
            JournalRecord::Register(r) => Some(r),
            _ => None,
        })
        .collect();
    assert_eq!(registrations.len(), 2);
    assert!(registrations.iter().all(|r| r.syscall == GETEUID));
    let grates: HashSet<_> = registrations.iter().map(|r| r.grate).collect();
    assert_eq!(grates.len(), 2);

    let outcomes = outcomes(Rendezvous::new(config.rendezvous_dir()).dir());
    assert_eq!(outcomes.len(), 2);
    for outcome in &outcomes {
        assert!(registrations.iter().any(|r| r.target_cage == outcome.cage));
        assert_eq!(outcome.returns_of(GETEUID), vec![EUID_GRATE_VAL]);
    }
}

#[test]
#[serial]
fn test_failure_deep_in_chain_propagates() {
    let dir = tempfile::tempdir().unwrap();
    let config = RuntimeConfig::default().with_state_dir(dir.path());
    let loader = ChainLoader::new(config, chain_interceptions());

    let plan = ChainPlan::parse(&[GRATE, CAGE, GRATE, "/nonexistent/cage"]).unwrap();
    let report = loader.launch(&plan).unwrap();
    assert_ne!(report.exit_code(), 0);
}

#[test]
fn test_chain_deeper_than_limit_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let config = RuntimeConfig::default()
        .with_state_dir(dir.path())
        .with_max_chain_depth(1);
    let loader = ChainLoader::new(config, chain_interceptions());

    let plan = ChainPlan::parse(&[GRATE, CAGE, GRATE, CAGE]).unwrap();
    assert!(matches!(
        loader.launch(&plan),
        Err(ProcessError::ChainTooDeep { depth: 2, max: 1 })
    ));
}
