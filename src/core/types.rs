/*!
 * Core Types
 * Identifier newtypes shared by the grate, interposition and process layers
 */

use serde::{Deserialize, Serialize};
use std::fmt;

/// A machine word as it crosses the interposition boundary
pub type Word = u64;

macro_rules! word_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Word);

        impl $name {
            #[inline]
            pub const fn new(raw: Word) -> Self {
                Self(raw)
            }

            #[inline]
            pub const fn as_raw(self) -> Word {
                self.0
            }
        }

        impl From<Word> for $name {
            fn from(raw: Word) -> Self {
                Self(raw)
            }
        }

        impl From<$name> for Word {
            fn from(id: $name) -> Word {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "{}"), self.0)
            }
        }
    };
}

word_id!(
    /// Identity of an isolated process. Assigned at creation (the OS pid) and never reused
    /// while the process lives. Zero means "no cage".
    CageId,
    "cage#"
);

word_id!(
    /// Identity of a grate. A grate is itself a process, so its id lives in the same space
    /// as cage ids.
    GrateId,
    "grate#"
);

word_id!(
    /// Externally defined syscall number
    SyscallNumber,
    "sys#"
);

word_id!(
    /// Position of a handler inside one grate's handler table
    HandlerIndex,
    "handler#"
);

impl CageId {
    /// Zero is reserved and never names a live process
    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }

    pub fn from_pid(pid: nix::unistd::Pid) -> Self {
        Self(pid.as_raw() as Word)
    }

    /// Identity of the calling process
    pub fn current() -> Self {
        Self::from_pid(nix::unistd::getpid())
    }
}

impl GrateId {
    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }

    pub fn from_pid(pid: nix::unistd::Pid) -> Self {
        Self(pid.as_raw() as Word)
    }

    pub fn current() -> Self {
        Self::from_pid(nix::unistd::getpid())
    }

    /// The grate viewed as a cage (for exit bookkeeping)
    #[inline]
    pub const fn as_cage(self) -> CageId {
        CageId(self.0)
    }
}

impl HandlerIndex {
    #[inline]
    pub fn as_usize(self) -> Option<usize> {
        usize::try_from(self.0).ok()
    }
}
