/*!
 * Registration Journal
 * Append-only record of registrations shared between processes
 *
 * Grates and cages are separate processes, so the interception table cannot simply
 * live in one address space. Every change is appended as a fixed 40-byte record:
 * an op word followed by four argument words, all little-endian. Appends are single
 * `write` calls on an O_APPEND descriptor, which keeps concurrent writers from
 * interleaving and lets a freshly forked child record its own registration before
 * exec without allocating.
 */

use super::client::SyscallChannel;
use super::table::InterceptionTable;
use super::types::{Registration, RegistrationError};
use crate::core::syscall_numbers::{self, REGISTER_HANDLER};
use crate::core::types::{CageId, GrateId, SyscallNumber, Word};
use miette::Diagnostic;
use nix::errno::Errno;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Size of one encoded record
pub const RECORD_LEN: usize = 40;

const WORD_LEN: usize = 8;

const OP_REGISTER: Word = 1;
const OP_REVOKE: Word = 2;
const OP_GRATE_EXIT: Word = 3;
const OP_CAGE_EXIT: Word = 4;

#[derive(Error, Debug, Diagnostic)]
pub enum JournalError {
    #[error("journal I/O failed on {path}: {source}")]
    #[diagnostic(
        code(journal::io),
        help("Check that the state directory exists and is writable.")
    )]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unknown journal op {op} in record {record}")]
    #[diagnostic(code(journal::corrupt))]
    UnknownOp { op: Word, record: usize },
}

/// One journal entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum JournalRecord {
    Register(Registration),
    Revoke { cage: CageId, syscall: SyscallNumber },
    GrateExit { grate: GrateId },
    CageExit { cage: CageId },
}

impl JournalRecord {
    pub fn encode(&self) -> [u8; RECORD_LEN] {
        let words: [Word; 5] = match *self {
            Self::Register(r) => [
                OP_REGISTER,
                r.target_cage.as_raw(),
                r.syscall.as_raw(),
                r.handler.as_raw(),
                r.grate.as_raw(),
            ],
            Self::Revoke { cage, syscall } => [OP_REVOKE, cage.as_raw(), syscall.as_raw(), 0, 0],
            Self::GrateExit { grate } => [OP_GRATE_EXIT, grate.as_raw(), 0, 0, 0],
            Self::CageExit { cage } => [OP_CAGE_EXIT, cage.as_raw(), 0, 0, 0],
        };

        let mut bytes = [0u8; RECORD_LEN];
        for (chunk, word) in bytes.chunks_exact_mut(WORD_LEN).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        bytes
    }

    /// Decode record number `record` (used only for error reporting)
    pub fn decode(bytes: &[u8; RECORD_LEN], record: usize) -> Result<Self, JournalError> {
        let mut words = [0 as Word; 5];
        for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(WORD_LEN)) {
            let mut raw = [0u8; WORD_LEN];
            raw.copy_from_slice(chunk);
            *word = Word::from_le_bytes(raw);
        }

        match words[0] {
            OP_REGISTER => Ok(Self::Register(Registration::from_words([
                words[1], words[2], words[3], words[4], 0, 0,
            ]))),
            OP_REVOKE => Ok(Self::Revoke {
                cage: CageId::new(words[1]),
                syscall: SyscallNumber::new(words[2]),
            }),
            OP_GRATE_EXIT => Ok(Self::GrateExit {
                grate: GrateId::new(words[1]),
            }),
            OP_CAGE_EXIT => Ok(Self::CageExit {
                cage: CageId::new(words[1]),
            }),
            op => Err(JournalError::UnknownOp { op, record }),
        }
    }

    /// Apply to a table. Refused registrations are logged and skipped.
    pub fn apply(&self, table: &InterceptionTable) {
        match *self {
            Self::Register(registration) => {
                if let Err(e) = table.register(registration) {
                    debug!(error = %e, "Journal registration not applied");
                }
            }
            Self::Revoke { cage, syscall } => {
                table.revoke(cage, syscall);
            }
            Self::GrateExit { grate } => {
                table.grate_exited(grate);
            }
            Self::CageExit { cage } => {
                table.cage_exited(cage);
            }
        }
    }
}

/// Path-level handle on a journal file
#[derive(Debug, Clone)]
pub struct RegistrationJournal {
    path: PathBuf,
}

impl RegistrationJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Start an empty journal, discarding any previous one
    pub fn create(&self) -> Result<JournalWriter, JournalError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| self.io_error(source))?;
        }
        File::create(&self.path).map_err(|source| self.io_error(source))?;
        info!(path = %self.path.display(), "Registration journal created");
        self.open()
    }

    /// Open for appending, creating the file if needed
    pub fn open(&self) -> Result<JournalWriter, JournalError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| self.io_error(source))?;
        Ok(JournalWriter {
            file,
            path: self.path.clone(),
        })
    }

    /// Every complete record, in append order
    pub fn read_all(&self) -> Result<Vec<JournalRecord>, JournalError> {
        self.read_from(0)
    }

    /// Complete records starting at record number `skip`.
    ///
    /// A trailing partial record belongs to a write still in flight and is ignored.
    /// A missing file reads as empty.
    pub fn read_from(&self, skip: usize) -> Result<Vec<JournalRecord>, JournalError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(self.io_error(source)),
        };

        let chunks = bytes.chunks_exact(RECORD_LEN);
        if !chunks.remainder().is_empty() {
            warn!(
                path = %self.path.display(),
                trailing = chunks.remainder().len(),
                "Ignoring partial journal record"
            );
        }

        chunks
            .enumerate()
            .skip(skip)
            .map(|(i, chunk)| {
                let mut record = [0u8; RECORD_LEN];
                record.copy_from_slice(chunk);
                JournalRecord::decode(&record, i)
            })
            .collect()
    }

    /// Rebuild a table from scratch
    pub fn replay_into(&self, table: &InterceptionTable) -> Result<usize, JournalError> {
        let records = self.read_all()?;
        for record in &records {
            record.apply(table);
        }
        Ok(records.len())
    }

    fn io_error(&self, source: std::io::Error) -> JournalError {
        JournalError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

/// Open append handle. The descriptor is close-on-exec.
#[derive(Debug)]
pub struct JournalWriter {
    file: File,
    path: PathBuf,
}

impl JournalWriter {
    /// Append one record with a single write. Does not allocate.
    pub fn append_raw(&self, record: &JournalRecord) -> std::io::Result<()> {
        (&self.file).write_all(&record.encode())
    }

    pub fn append(&self, record: JournalRecord) -> Result<(), JournalError> {
        self.append_raw(&record).map_err(|source| JournalError::Io {
            path: self.path.clone(),
            source,
        })?;
        debug!(record = ?record, "Journal record appended");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Syscall channel whose only call is register_handler, recorded in the journal.
///
/// Validation mirrors what can be checked without the live table; exit ordering is
/// enforced when the journal is replayed.
#[derive(Debug, Clone)]
pub struct JournalChannel {
    writer: Arc<JournalWriter>,
}

impl JournalChannel {
    pub fn new(writer: Arc<JournalWriter>) -> Self {
        Self { writer }
    }

    pub fn writer(&self) -> &Arc<JournalWriter> {
        &self.writer
    }
}

impl SyscallChannel for JournalChannel {
    fn make_syscall(&self, number: SyscallNumber, _name: &'static str, args: [Word; 6]) -> i64 {
        if number != REGISTER_HANDLER {
            return -(Errno::ENOSYS as i64);
        }

        let registration = Registration::from_words(args);
        if !registration.target_cage.is_valid() || !registration.grate.is_valid() {
            return RegistrationError::Invalid(registration).to_status();
        }
        if syscall_numbers::is_reserved(registration.syscall) {
            return RegistrationError::Reserved(registration.syscall).to_status();
        }

        match self.writer.append_raw(&JournalRecord::Register(registration)) {
            Ok(()) => 0,
            Err(_) => RegistrationError::Io.to_status(),
        }
    }
}
