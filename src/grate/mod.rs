/*!
 * Grate Module
 * Handler tables and the dispatch entry point a grate exposes to the runtime
 */

pub mod dispatch;
pub mod handlers;
pub mod table;
pub mod types;

pub use dispatch::{DispatchEntry, DispatchError, DispatchStats, Dispatcher};
pub use table::{HandlerEntry, HandlerFn, HandlerTable, HandlerTableBuilder};
pub use types::{Arg, ArgumentVector, ProvenanceError, ARG_WORDS, DISPATCH_ERROR, MAX_ARGS};
