/*!
 * Handler Table
 * Frozen index -> handler mapping owned by one grate
 */

use super::types::ArgumentVector;
use crate::core::types::{CageId, HandlerIndex};
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Handler callback type: caller cage plus its provenance-tagged arguments
pub type HandlerFn = Arc<dyn Fn(CageId, &ArgumentVector) -> i64 + Send + Sync>;

#[derive(Clone)]
pub struct HandlerEntry {
    name: &'static str,
    func: HandlerFn,
}

impl HandlerEntry {
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn call(&self, caller: CageId, args: &ArgumentVector) -> i64 {
        (self.func)(caller, args)
    }
}

impl fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Immutable handler table. There is no way to add or remove entries once built.
#[derive(Debug)]
pub struct HandlerTable {
    entries: Box<[HandlerEntry]>,
}

impl HandlerTable {
    pub fn builder() -> HandlerTableBuilder {
        HandlerTableBuilder::new()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bounds-checked lookup
    #[inline]
    pub fn get(&self, index: HandlerIndex) -> Option<&HandlerEntry> {
        index.as_usize().and_then(|i| self.entries.get(i))
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.name).collect()
    }

    /// Index of the first handler registered under `name`
    pub fn index_of(&self, name: &str) -> Option<HandlerIndex> {
        self.entries
            .iter()
            .position(|e| e.name == name)
            .map(|i| HandlerIndex::new(i as u64))
    }
}

/// Configuration-phase builder. Handlers are numbered in insertion order.
#[derive(Default)]
pub struct HandlerTableBuilder {
    entries: Vec<HandlerEntry>,
}

impl HandlerTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler; it receives the next free index
    pub fn handler<F>(mut self, name: &'static str, func: F) -> Self
    where
        F: Fn(CageId, &ArgumentVector) -> i64 + Send + Sync + 'static,
    {
        self.entries.push(HandlerEntry {
            name,
            func: Arc::new(func),
        });
        self
    }

    /// Append an already shared handler
    pub fn handler_fn(mut self, name: &'static str, func: HandlerFn) -> Self {
        self.entries.push(HandlerEntry { name, func });
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Freeze the table. Ends the configuration phase.
    pub fn build(self) -> Arc<HandlerTable> {
        info!(handlers = self.entries.len(), "Handler table frozen");
        Arc::new(HandlerTable {
            entries: self.entries.into_boxed_slice(),
        })
    }
}
