/*!
 * Loopback Runtime
 * Cage-side view of the interception table, rebuilt from the journal
 *
 * Each cage keeps its own table and folds in journal records it has not seen yet
 * before every call. Grate ids in the journal are resolved to dispatch entries
 * through a catalog; a grate the catalog cannot resolve leaves its bindings
 * answering -ESRCH.
 */

use super::client::SyscallChannel;
use super::journal::{JournalError, JournalRecord, RegistrationJournal};
use super::native::NativeSyscalls;
use super::table::InterceptionTable;
use crate::core::types::{CageId, GrateId, SyscallNumber, Word};
use crate::grate::{Arg, ArgumentVector, DispatchEntry};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Resolves a grate id to the dispatch entry that serves it
pub trait GrateCatalog: Send + Sync {
    fn resolve(&self, grate: GrateId) -> Option<Arc<dyn DispatchEntry>>;
}

impl<F> GrateCatalog for F
where
    F: Fn(GrateId) -> Option<Arc<dyn DispatchEntry>> + Send + Sync,
{
    fn resolve(&self, grate: GrateId) -> Option<Arc<dyn DispatchEntry>> {
        self(grate)
    }
}

pub struct LoopbackRuntime {
    table: Arc<InterceptionTable>,
    journal: RegistrationJournal,
    catalog: Arc<dyn GrateCatalog>,
    applied: Mutex<usize>,
}

impl LoopbackRuntime {
    pub fn new(
        journal_path: impl Into<PathBuf>,
        catalog: Arc<dyn GrateCatalog>,
        native: Arc<dyn NativeSyscalls>,
    ) -> Self {
        Self {
            table: Arc::new(InterceptionTable::with_native(native)),
            journal: RegistrationJournal::new(journal_path),
            catalog,
            applied: Mutex::new(0),
        }
    }

    pub fn table(&self) -> &Arc<InterceptionTable> {
        &self.table
    }

    /// Fold in journal records appended since the last sync.
    /// Returns how many new records were applied.
    pub fn sync(&self) -> Result<usize, JournalError> {
        let mut applied = self.applied.lock();
        let records = self.journal.read_from(*applied)?;

        for record in &records {
            if let JournalRecord::Register(registration) = record {
                self.ensure_attached(registration.grate);
            }
            record.apply(&self.table);
        }

        *applied += records.len();
        if !records.is_empty() {
            debug!(new = records.len(), total = *applied, "Loopback table synced");
        }
        Ok(records.len())
    }

    fn ensure_attached(&self, grate: GrateId) {
        if self.table.is_attached(grate) || self.table.has_exited(grate.as_cage()) {
            return;
        }
        match self.catalog.resolve(grate) {
            Some(entry) => {
                self.table.attach_grate(entry);
            }
            None => warn!(grate = %grate, "No dispatch entry known for grate"),
        }
    }

    /// MAKE_SYSCALL on behalf of `caller`
    pub fn call(&self, caller: CageId, syscall: SyscallNumber, args: &ArgumentVector) -> i64 {
        if let Err(e) = self.sync() {
            warn!(error = %e, "Journal sync failed, routing with stale table");
        }
        self.table.call(caller, syscall, args)
    }

    pub fn channel(self: &Arc<Self>, caller: CageId) -> LoopbackChannel {
        LoopbackChannel {
            runtime: Arc::clone(self),
            caller,
        }
    }
}

#[derive(Clone)]
pub struct LoopbackChannel {
    runtime: Arc<LoopbackRuntime>,
    caller: CageId,
}

impl LoopbackChannel {
    pub fn caller(&self) -> CageId {
        self.caller
    }
}

impl SyscallChannel for LoopbackChannel {
    fn make_syscall(&self, number: SyscallNumber, name: &'static str, args: [Word; 6]) -> i64 {
        let result = self.runtime.call(
            self.caller,
            number,
            &ArgumentVector::new(args.map(|value| Arg::new(value, self.caller))),
        );
        debug!(caller = %self.caller, syscall = %number, name, result, "Loopback call returned");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::syscall_numbers::{GETEUID, GETUID};
    use crate::core::types::HandlerIndex;
    use crate::grate::{handlers, Dispatcher, HandlerTable};
    use crate::interpose::native::Unsupported;
    use crate::interpose::types::Registration;
    use nix::errno::Errno;

    fn catalog() -> Arc<dyn GrateCatalog> {
        let table = HandlerTable::builder()
            .handler_fn("geteuid", handlers::identity("geteuid", 10))
            .handler_fn("getuid", handlers::identity("getuid", 10))
            .build();
        Arc::new(move |grate: GrateId| {
            Some(Arc::new(Dispatcher::new(grate, Arc::clone(&table))) as Arc<dyn DispatchEntry>)
        })
    }

    fn reg(cage: u64, sys: SyscallNumber, handler: u64, grate: u64) -> Registration {
        Registration::new(
            CageId::new(cage),
            sys,
            HandlerIndex::new(handler),
            GrateId::new(grate),
        )
    }

    #[test]
    fn test_picks_up_late_registrations() {
        let dir = tempfile::tempdir().unwrap();
        let journal = RegistrationJournal::new(dir.path().join("j"));
        let writer = journal.create().unwrap();

        let runtime = Arc::new(LoopbackRuntime::new(
            journal.path(),
            catalog(),
            Arc::new(Unsupported),
        ));
        let channel = runtime.channel(CageId::new(5));
        assert_eq!(
            channel.make_syscall(GETUID, "getuid", [0; 6]),
            -(Errno::ENOSYS as i64)
        );

        writer.append(JournalRecord::Register(reg(5, GETUID, 1, 2))).unwrap();
        assert_eq!(channel.make_syscall(GETUID, "getuid", [0; 6]), 10);
        assert_eq!(runtime.sync().unwrap(), 0);
    }

    #[test]
    fn test_unresolved_grate_answers_esrch() {
        let dir = tempfile::tempdir().unwrap();
        let journal = RegistrationJournal::new(dir.path().join("j"));
        let writer = journal.create().unwrap();
        writer.append(JournalRecord::Register(reg(5, GETEUID, 0, 2))).unwrap();

        let nothing: Arc<dyn GrateCatalog> = Arc::new(|_: GrateId| None);
        let runtime = LoopbackRuntime::new(journal.path(), nothing, Arc::new(Unsupported));
        assert_eq!(
            runtime.call(CageId::new(5), GETEUID, &ArgumentVector::default()),
            -(Errno::ESRCH as i64)
        );
    }
}
