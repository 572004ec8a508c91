/*!
 * Demo Catalog
 * The handler table every demo grate is built with, and how cages resolve it
 */

use crate::core::syscall_numbers::{GETEUID, GETUID};
use crate::core::types::{GrateId, HandlerIndex, SyscallNumber};
use crate::grate::{handlers, DispatchEntry, Dispatcher, HandlerTable};
use crate::interpose::GrateCatalog;
use std::path::Path;
use std::sync::Arc;

/// Value the demo grate answers for getuid
pub const UID_GRATE_VAL: i64 = 10;
/// Value the demo grate answers for geteuid
pub const EUID_GRATE_VAL: i64 = 10;

pub const GETEUID_HANDLER: HandlerIndex = HandlerIndex::new(0);
pub const GETUID_HANDLER: HandlerIndex = HandlerIndex::new(1);
pub const OPEN_HANDLER: HandlerIndex = HandlerIndex::new(2);
pub const ADD_HANDLER: HandlerIndex = HandlerIndex::new(3);

/// File the open handler creates, relative to the state directory
pub const DEMO_FILE: &str = "testfile.txt";

pub fn demo_table(workdir: &Path) -> Arc<HandlerTable> {
    HandlerTable::builder()
        .handler_fn("geteuid", handlers::identity("geteuid", EUID_GRATE_VAL))
        .handler_fn("getuid", handlers::identity("getuid", UID_GRATE_VAL))
        .handler_fn("open", handlers::open_file(workdir.join(DEMO_FILE)))
        .handler_fn("add", handlers::add())
        .build()
}

/// What a session grate intercepts on its target cage
pub fn session_interceptions() -> Vec<(SyscallNumber, HandlerIndex)> {
    vec![(GETUID, GETUID_HANDLER), (GETEUID, GETEUID_HANDLER)]
}

/// What every chained cage registers under its grate
pub fn chain_interceptions() -> Vec<(SyscallNumber, HandlerIndex)> {
    vec![(GETEUID, GETEUID_HANDLER)]
}

/// Every demo grate is built from the same table, so any grate id resolves to it
#[derive(Clone)]
pub struct DemoCatalog {
    table: Arc<HandlerTable>,
}

impl DemoCatalog {
    pub fn new(workdir: &Path) -> Self {
        Self {
            table: demo_table(workdir),
        }
    }

    pub fn dispatcher(&self, grate: GrateId) -> Dispatcher {
        Dispatcher::new(grate, Arc::clone(&self.table))
    }
}

impl GrateCatalog for DemoCatalog {
    fn resolve(&self, grate: GrateId) -> Option<Arc<dyn DispatchEntry>> {
        Some(Arc::new(self.dispatcher(grate)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::CageId;
    use crate::grate::ArgumentVector;

    #[test]
    fn test_table_layout() {
        let dir = tempfile::tempdir().unwrap();
        let table = demo_table(dir.path());
        assert_eq!(table.names(), vec!["geteuid", "getuid", "open", "add"]);
        assert_eq!(table.index_of("getuid"), Some(GETUID_HANDLER));
    }

    #[test]
    fn test_resolved_entry_answers_identity() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = DemoCatalog::new(dir.path());
        let entry = catalog.resolve(GrateId::new(8)).unwrap();
        assert_eq!(entry.grate(), GrateId::new(8));
        assert_eq!(
            entry.dispatch(GETUID_HANDLER, CageId::new(9), &ArgumentVector::default()),
            UID_GRATE_VAL
        );
    }
}
