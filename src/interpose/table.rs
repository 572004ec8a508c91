/*!
 * Interception Table
 * In-process model of the runtime's registration store and call router
 *
 * Keys are (target cage, syscall number); each key holds at most one binding and a
 * later registration replaces an earlier one. Grates attach their dispatch entry so
 * routed calls can reach them. Exited cages and grates lose every binding that
 * names them.
 */

use super::client::SyscallChannel;
use super::native::{NativeSyscalls, Unsupported};
use super::types::{AuditEvent, Binding, Registration, RegistrationError, RegistrationOutcome};
use crate::core::syscall_numbers::{self, EXIT, REGISTER_HANDLER};
use crate::core::types::{CageId, GrateId, SyscallNumber, Word};
use crate::grate::{Arg, ArgumentVector, DispatchEntry};
use ahash::RandomState;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use nix::errno::Errno;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct InterceptionTable {
    bindings: DashMap<(CageId, SyscallNumber), Binding, RandomState>,
    grates: DashMap<GrateId, Arc<dyn DispatchEntry>, RandomState>,
    exited: DashSet<CageId, RandomState>,
    audit: Mutex<Vec<AuditEvent>>,
    native: Arc<dyn NativeSyscalls>,
}

impl InterceptionTable {
    pub fn new() -> Self {
        Self::with_native(Arc::new(Unsupported))
    }

    pub fn with_native(native: Arc<dyn NativeSyscalls>) -> Self {
        Self {
            bindings: DashMap::with_hasher(RandomState::new()),
            grates: DashMap::with_hasher(RandomState::new()),
            exited: DashSet::with_hasher(RandomState::new()),
            audit: Mutex::new(Vec::new()),
            native,
        }
    }

    /// Make a grate's dispatch entry reachable. Returns the entry it replaced.
    pub fn attach_grate(&self, entry: Arc<dyn DispatchEntry>) -> Option<Arc<dyn DispatchEntry>> {
        let grate = entry.grate();
        debug!(grate = %grate, "Grate entry attached");
        self.grates.insert(grate, entry)
    }

    pub fn is_attached(&self, grate: GrateId) -> bool {
        self.grates.contains_key(&grate)
    }

    /// Install a binding; last writer wins
    pub fn register(
        &self,
        registration: Registration,
    ) -> Result<RegistrationOutcome, RegistrationError> {
        if !registration.target_cage.is_valid() || !registration.grate.is_valid() {
            return Err(RegistrationError::Invalid(registration));
        }
        if syscall_numbers::is_reserved(registration.syscall) {
            return Err(RegistrationError::Reserved(registration.syscall));
        }
        if self.exited.contains(&registration.target_cage) {
            return Err(RegistrationError::Exited(registration.target_cage));
        }
        if self.exited.contains(&registration.grate.as_cage()) {
            return Err(RegistrationError::Exited(registration.grate.as_cage()));
        }

        let binding = registration.binding();
        let outcome = match self
            .bindings
            .entry((registration.target_cage, registration.syscall))
        {
            Entry::Occupied(mut occupied) => {
                if *occupied.get() == binding {
                    RegistrationOutcome::Unchanged
                } else {
                    RegistrationOutcome::Replaced(occupied.insert(binding))
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(binding);
                RegistrationOutcome::Installed
            }
        };

        match outcome {
            RegistrationOutcome::Installed => {
                info!(
                    cage = %registration.target_cage,
                    syscall = %registration.syscall,
                    handler = %registration.handler,
                    grate = %registration.grate,
                    "Interception installed"
                );
                self.audit.lock().push(AuditEvent::Installed { registration });
            }
            RegistrationOutcome::Replaced(previous) => {
                info!(
                    cage = %registration.target_cage,
                    syscall = %registration.syscall,
                    previous_grate = %previous.grate,
                    grate = %registration.grate,
                    "Interception overwritten"
                );
                self.audit.lock().push(AuditEvent::Replaced {
                    registration,
                    previous,
                });
            }
            RegistrationOutcome::Unchanged => {}
        }

        Ok(outcome)
    }

    /// Explicitly drop the binding for one pair
    pub fn revoke(&self, cage: CageId, syscall: SyscallNumber) -> Option<Binding> {
        let (_, binding) = self.bindings.remove(&(cage, syscall))?;
        info!(cage = %cage, syscall = %syscall, grate = %binding.grate, "Interception revoked");
        self.audit.lock().push(AuditEvent::Revoked {
            cage,
            syscall,
            binding,
        });
        Some(binding)
    }

    /// A grate went away: detach it and invalidate every binding it owned
    pub fn grate_exited(&self, grate: GrateId) -> usize {
        self.grates.remove(&grate);
        self.exited.insert(grate.as_cage());

        let before = self.bindings.len();
        self.bindings.retain(|_, binding| binding.grate != grate);
        let removed = before.saturating_sub(self.bindings.len());

        info!(grate = %grate, removed, "Grate exited, orphaned interceptions dropped");
        self.audit
            .lock()
            .push(AuditEvent::GrateDetached { grate, removed });
        removed
    }

    /// A cage went away: drop every binding that targets it
    pub fn cage_exited(&self, cage: CageId) -> usize {
        self.exited.insert(cage);

        let before = self.bindings.len();
        self.bindings.retain(|(target, _), _| *target != cage);
        let removed = before.saturating_sub(self.bindings.len());

        info!(cage = %cage, removed, "Cage exited");
        self.audit
            .lock()
            .push(AuditEvent::CageExited { cage, removed });
        removed
    }

    pub fn has_exited(&self, cage: CageId) -> bool {
        self.exited.contains(&cage)
    }

    pub fn lookup(&self, cage: CageId, syscall: SyscallNumber) -> Option<Binding> {
        self.bindings.get(&(cage, syscall)).map(|b| *b.value())
    }

    /// Snapshot of active registrations, ordered by (cage, syscall)
    pub fn registrations(&self) -> Vec<Registration> {
        let mut out: Vec<Registration> = self
            .bindings
            .iter()
            .map(|entry| {
                let (cage, syscall) = *entry.key();
                let binding = *entry.value();
                Registration::new(cage, syscall, binding.handler, binding.grate)
            })
            .collect();
        out.sort_by_key(|r| (r.target_cage, r.syscall));
        out
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn audit_log(&self) -> Vec<AuditEvent> {
        self.audit.lock().clone()
    }

    /// Route to the bound grate, or `None` when nothing intercepts the call
    pub fn route(
        &self,
        caller: CageId,
        syscall: SyscallNumber,
        args: &ArgumentVector,
    ) -> Option<i64> {
        let binding = self.lookup(caller, syscall)?;
        // Clone the entry out so no shard lock is held while the handler runs
        let entry = self.grates.get(&binding.grate).map(|e| Arc::clone(e.value()));

        match entry {
            Some(entry) => {
                debug!(
                    caller = %caller,
                    syscall = %syscall,
                    grate = %binding.grate,
                    handler = %binding.handler,
                    "Routing intercepted call"
                );
                Some(entry.dispatch(binding.handler, caller, args))
            }
            None => {
                warn!(
                    caller = %caller,
                    syscall = %syscall,
                    grate = %binding.grate,
                    "Binding names a grate with no dispatch entry"
                );
                Some(-(Errno::ESRCH as i64))
            }
        }
    }

    /// Full MAKE_SYSCALL semantics for `caller`
    pub fn call(&self, caller: CageId, syscall: SyscallNumber, args: &ArgumentVector) -> i64 {
        if self.exited.contains(&caller) && syscall != EXIT {
            return -(Errno::ESRCH as i64);
        }

        if syscall == REGISTER_HANDLER {
            return match self.register(Registration::from_words(args.values())) {
                Ok(_) => 0,
                Err(e) => e.to_status(),
            };
        }

        match self.route(caller, syscall, args) {
            Some(result) => result,
            None => self.native.invoke(caller, syscall, args),
        }
    }

    /// Channel bound to one caller
    pub fn channel(self: &Arc<Self>, caller: CageId) -> CageChannel {
        CageChannel {
            table: Arc::clone(self),
            caller,
        }
    }
}

impl Default for InterceptionTable {
    fn default() -> Self {
        Self::new()
    }
}

/// The table as seen from one cage
#[derive(Clone)]
pub struct CageChannel {
    table: Arc<InterceptionTable>,
    caller: CageId,
}

impl CageChannel {
    pub fn caller(&self) -> CageId {
        self.caller
    }
}

impl SyscallChannel for CageChannel {
    fn make_syscall(&self, number: SyscallNumber, name: &'static str, args: [Word; 6]) -> i64 {
        debug!(caller = %self.caller, syscall = %number, name, "make_syscall");
        let args = ArgumentVector::new(args.map(|value| Arg::new(value, self.caller)));
        self.table.call(self.caller, number, &args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::syscall_numbers::GETUID;
    use crate::core::types::HandlerIndex;
    use crate::grate::{handlers, Dispatcher, HandlerTable};
    use crate::interpose::client::RegistrationClient;

    fn reg(cage: u64, sys: SyscallNumber, handler: u64, grate: u64) -> Registration {
        Registration::new(
            CageId::new(cage),
            sys,
            HandlerIndex::new(handler),
            GrateId::new(grate),
        )
    }

    fn identity_grate(grate: u64, value: i64) -> Arc<dyn DispatchEntry> {
        let table = HandlerTable::builder()
            .handler_fn("zero", handlers::identity("zero", 0))
            .handler_fn("identity", handlers::identity("identity", value))
            .build();
        Arc::new(Dispatcher::new(GrateId::new(grate), table))
    }

    #[test]
    fn test_register_then_route() {
        let table = InterceptionTable::new();
        table.attach_grate(identity_grate(2, 10));

        assert_eq!(
            table.register(reg(5, GETUID, 1, 2)),
            Ok(RegistrationOutcome::Installed)
        );
        assert_eq!(
            table.route(CageId::new(5), GETUID, &ArgumentVector::default()),
            Some(10)
        );
        // Other cages are untouched
        assert_eq!(
            table.route(CageId::new(6), GETUID, &ArgumentVector::default()),
            None
        );
    }

    #[test]
    fn test_last_writer_wins() {
        let table = InterceptionTable::new();
        table.attach_grate(identity_grate(2, 10));
        table.attach_grate(identity_grate(3, 33));

        table.register(reg(5, GETUID, 1, 2)).unwrap();
        let outcome = table.register(reg(5, GETUID, 1, 3)).unwrap();
        assert_eq!(
            outcome,
            RegistrationOutcome::Replaced(Binding {
                handler: HandlerIndex::new(1),
                grate: GrateId::new(2)
            })
        );
        assert_eq!(
            table.route(CageId::new(5), GETUID, &ArgumentVector::default()),
            Some(33)
        );
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_identical_registration_is_unchanged() {
        let table = InterceptionTable::new();
        table.register(reg(5, GETUID, 1, 2)).unwrap();
        assert_eq!(
            table.register(reg(5, GETUID, 1, 2)),
            Ok(RegistrationOutcome::Unchanged)
        );
        assert_eq!(table.audit_log().len(), 1);
    }

    #[test]
    fn test_rejects_invalid_and_reserved() {
        let table = InterceptionTable::new();
        assert!(matches!(
            table.register(reg(0, GETUID, 1, 2)),
            Err(RegistrationError::Invalid(_))
        ));
        assert_eq!(
            table.register(reg(5, REGISTER_HANDLER, 1, 2)),
            Err(RegistrationError::Reserved(REGISTER_HANDLER))
        );
    }

    #[test]
    fn test_grate_exit_invalidates_its_bindings() {
        let table = InterceptionTable::new();
        table.attach_grate(identity_grate(2, 10));
        table.register(reg(5, GETUID, 1, 2)).unwrap();
        table.register(reg(6, GETUID, 1, 2)).unwrap();
        table.register(reg(7, GETUID, 1, 3)).unwrap();

        assert_eq!(table.grate_exited(GrateId::new(2)), 2);
        assert!(!table.is_attached(GrateId::new(2)));
        assert_eq!(table.registrations(), vec![reg(7, GETUID, 1, 3)]);

        // An exited grate cannot come back through registration
        assert_eq!(
            table.register(reg(8, GETUID, 1, 2)),
            Err(RegistrationError::Exited(CageId::new(2)))
        );
    }

    #[test]
    fn test_cage_exit_blocks_calls() {
        let table = InterceptionTable::new();
        table.register(reg(5, GETUID, 1, 2)).unwrap();
        assert_eq!(table.cage_exited(CageId::new(5)), 1);

        assert_eq!(
            table.call(CageId::new(5), GETUID, &ArgumentVector::default()),
            -(Errno::ESRCH as i64)
        );
        assert_eq!(
            table.register(reg(5, GETUID, 1, 2)),
            Err(RegistrationError::Exited(CageId::new(5)))
        );
    }

    #[test]
    fn test_revoke_falls_back_to_native() {
        let table = InterceptionTable::new();
        table.attach_grate(identity_grate(2, 10));
        table.register(reg(5, GETUID, 1, 2)).unwrap();

        assert!(table.revoke(CageId::new(5), GETUID).is_some());
        assert!(table.revoke(CageId::new(5), GETUID).is_none());
        assert_eq!(
            table.call(CageId::new(5), GETUID, &ArgumentVector::default()),
            -(Errno::ENOSYS as i64)
        );
    }

    #[test]
    fn test_registration_through_channel() {
        let table = Arc::new(InterceptionTable::new());
        table.attach_grate(identity_grate(2, 10));

        let grate_side = RegistrationClient::new(table.channel(CageId::new(2)));
        grate_side.register(reg(5, GETUID, 1, 2)).unwrap();

        let cage_side = table.channel(CageId::new(5));
        assert_eq!(cage_side.make_syscall(GETUID, "getuid", [0; 6]), 10);
    }

    #[test]
    fn test_bound_grate_without_entry_reports_esrch() {
        let table = InterceptionTable::new();
        table.register(reg(5, GETUID, 1, 9)).unwrap();
        assert_eq!(
            table.route(CageId::new(5), GETUID, &ArgumentVector::default()),
            Some(-(Errno::ESRCH as i64))
        );
    }
}
