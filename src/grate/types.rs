/*!
 * Grate Types
 * Provenance-tagged argument vectors passed to handlers
 */

use crate::core::types::{CageId, Word};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Word-level result reported when a dispatch cannot be served
pub const DISPATCH_ERROR: i64 = -1;

/// Arity of every intercepted call
pub const MAX_ARGS: usize = 6;

/// Length of the raw (value, owner) word form of an argument vector
pub const ARG_WORDS: usize = MAX_ARGS * 2;

/// One argument together with the cage whose address space gives it meaning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Arg {
    pub value: Word,
    pub cage: CageId,
}

impl Arg {
    #[inline]
    pub const fn new(value: Word, cage: CageId) -> Self {
        Self { value, cage }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum ProvenanceError {
    #[error("argument {position} belongs to {owner}, handler only trusts {trusted}")]
    #[diagnostic(
        code(grate::foreign_argument),
        help("Route cross-cage values through the runtime's copy mechanism instead.")
    )]
    ForeignOwner {
        position: usize,
        owner: CageId,
        trusted: CageId,
    },

    #[error("argument position {0} is outside the six-argument vector")]
    #[diagnostic(code(grate::bad_position))]
    BadPosition(usize),

    #[error("{0} arguments supplied, at most six are allowed")]
    #[diagnostic(code(grate::too_many_arguments))]
    TooMany(usize),
}

/// Fixed six-slot argument vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ArgumentVector([Arg; MAX_ARGS]);

impl ArgumentVector {
    pub const fn new(args: [Arg; MAX_ARGS]) -> Self {
        Self(args)
    }

    /// Build from plain values all owned by `owner`; unused slots are zero
    pub fn from_values(owner: CageId, values: &[Word]) -> Result<Self, ProvenanceError> {
        if values.len() > MAX_ARGS {
            return Err(ProvenanceError::TooMany(values.len()));
        }
        let mut args = [Arg::new(0, owner); MAX_ARGS];
        for (slot, value) in args.iter_mut().zip(values) {
            slot.value = *value;
        }
        Ok(Self(args))
    }

    /// Decode the interleaved runtime form: value1, owner1, value2, owner2, ...
    pub fn from_words(words: [Word; ARG_WORDS]) -> Self {
        let mut args = [Arg::default(); MAX_ARGS];
        for (i, slot) in args.iter_mut().enumerate() {
            *slot = Arg::new(words[2 * i], CageId::new(words[2 * i + 1]));
        }
        Self(args)
    }

    pub fn to_words(&self) -> [Word; ARG_WORDS] {
        let mut words = [0; ARG_WORDS];
        for (i, arg) in self.0.iter().enumerate() {
            words[2 * i] = arg.value;
            words[2 * i + 1] = arg.cage.as_raw();
        }
        words
    }

    pub fn get(&self, position: usize) -> Option<&Arg> {
        self.0.get(position)
    }

    /// Raw value at `position`, zero when out of range
    #[inline]
    pub fn value(&self, position: usize) -> Word {
        self.0.get(position).map(|arg| arg.value).unwrap_or(0)
    }

    /// Value at `position`, only if it is owned by `trusted`
    pub fn owned_value(&self, position: usize, trusted: CageId) -> Result<Word, ProvenanceError> {
        let arg = self
            .0
            .get(position)
            .ok_or(ProvenanceError::BadPosition(position))?;
        if arg.cage != trusted {
            return Err(ProvenanceError::ForeignOwner {
                position,
                owner: arg.cage,
                trusted,
            });
        }
        Ok(arg.value)
    }

    pub fn values(&self) -> [Word; MAX_ARGS] {
        self.0.map(|arg| arg.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arg> {
        self.0.iter()
    }
}
