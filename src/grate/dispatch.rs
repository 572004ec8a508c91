/*!
 * Dispatch Entry Point
 * Routes an intercepted call to the handler selected by index
 */

use super::table::HandlerTable;
use super::types::{ArgumentVector, ARG_WORDS, DISPATCH_ERROR};
use crate::core::types::{CageId, GrateId, HandlerIndex, Word};
use crate::monitoring::DispatchSpan;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum DispatchError {
    #[error("handler index {index} out of range for a {len}-entry table")]
    #[diagnostic(
        code(dispatch::index_out_of_range),
        help("The registration names a handler this grate does not provide.")
    )]
    IndexOutOfRange { index: Word, len: usize },
}

/// What the runtime needs from a grate: one routing function
pub trait DispatchEntry: Send + Sync {
    /// Owning grate
    fn grate(&self) -> GrateId;

    /// Route a call; out-of-range indices yield [`DISPATCH_ERROR`]
    fn dispatch(&self, index: HandlerIndex, caller: CageId, args: &ArgumentVector) -> i64;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DispatchStats {
    pub dispatched: u64,
    pub rejected: u64,
}

/// Table-backed dispatcher. Cheap to clone; the table is shared and read-only.
#[derive(Clone)]
pub struct Dispatcher {
    grate: GrateId,
    table: Arc<HandlerTable>,
    dispatched: Arc<AtomicU64>,
    rejected: Arc<AtomicU64>,
}

impl Dispatcher {
    pub fn new(grate: GrateId, table: Arc<HandlerTable>) -> Self {
        Self {
            grate,
            table,
            dispatched: Arc::new(AtomicU64::new(0)),
            rejected: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn table(&self) -> &Arc<HandlerTable> {
        &self.table
    }

    /// Route a call, surfacing the bounds failure as a typed error
    pub fn try_dispatch(
        &self,
        index: HandlerIndex,
        caller: CageId,
        args: &ArgumentVector,
    ) -> Result<i64, DispatchError> {
        let Some(entry) = self.table.get(index) else {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(DispatchError::IndexOutOfRange {
                index: index.as_raw(),
                len: self.table.len(),
            });
        };

        let span = DispatchSpan::new(self.grate, index, caller);
        let result = {
            let _entered = span.enter();
            entry.call(caller, args)
        };
        span.finish(result);

        self.dispatched.fetch_add(1, Ordering::Relaxed);
        Ok(result)
    }

    /// Raw calling convention: index, caller, then six (value, owner) pairs
    pub fn dispatch_words(&self, index: Word, caller: Word, words: [Word; ARG_WORDS]) -> i64 {
        self.dispatch(
            HandlerIndex::new(index),
            CageId::new(caller),
            &ArgumentVector::from_words(words),
        )
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

impl DispatchEntry for Dispatcher {
    fn grate(&self) -> GrateId {
        self.grate
    }

    fn dispatch(&self, index: HandlerIndex, caller: CageId, args: &ArgumentVector) -> i64 {
        match self.try_dispatch(index, caller, args) {
            Ok(result) => result,
            Err(e) => {
                warn!(grate = %self.grate, caller = %caller, error = %e, "Dispatch rejected");
                DISPATCH_ERROR
            }
        }
    }
}
