/*!
 * Handler Implementations
 * Illustrative leaves reachable through dispatch
 */

use super::table::HandlerFn;
use super::types::ArgumentVector;
use crate::core::types::CageId;
use nix::errno::Errno;
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::IntoRawFd;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

const DEFAULT_FILE_MODE: u32 = 0o644;

/// Always answers `value`. Typical stand-in for getuid/geteuid.
pub fn identity(label: &'static str, value: i64) -> HandlerFn {
    Arc::new(move |caller: CageId, _args: &ArgumentVector| {
        info!(caller = %caller, handler = label, value, "Identity handler answered");
        value
    })
}

/// Create (or open for writing) a file fixed at configuration time and hand the
/// descriptor back to the caller.
///
/// Argument 0 may carry permission bits for a newly created file. It is only honored
/// when the value belongs to the calling cage; a value tagged with another cage is
/// refused with `-EPERM`.
pub fn open_file(path: impl Into<PathBuf>) -> HandlerFn {
    let path = path.into();
    Arc::new(move |caller: CageId, args: &ArgumentVector| {
        let mode = match args.get(0) {
            Some(arg) if arg.value == 0 => DEFAULT_FILE_MODE,
            Some(_) => match args.owned_value(0, caller) {
                Ok(bits) => (bits as u32) & 0o777,
                Err(e) => {
                    warn!(caller = %caller, error = %e, "open handler refused foreign mode");
                    return -(Errno::EPERM as i64);
                }
            },
            None => DEFAULT_FILE_MODE,
        };

        match OpenOptions::new()
            .create(true)
            .write(true)
            .mode(mode)
            .open(&path)
        {
            Ok(file) => {
                let fd = file.into_raw_fd();
                info!(caller = %caller, path = %path.display(), fd, "open handler created file");
                fd as i64
            }
            Err(e) => {
                warn!(caller = %caller, path = %path.display(), error = %e, "open handler failed");
                -(e.raw_os_error().unwrap_or(Errno::EIO as i32) as i64)
            }
        }
    })
}

/// Sum of the first two argument values
pub fn add() -> HandlerFn {
    Arc::new(|_caller: CageId, args: &ArgumentVector| {
        (args.value(0) as i64).wrapping_add(args.value(1) as i64)
    })
}
