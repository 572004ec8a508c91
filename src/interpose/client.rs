/*!
 * Registration Client
 * Issues register_handler through whatever syscall channel the process has
 */

use super::types::{Registration, RegistrationError};
use crate::core::syscall_numbers::REGISTER_HANDLER;
use crate::core::types::{SyscallNumber, Word};
use std::sync::Arc;
use tracing::{info, warn};

/// MAKE_SYSCALL: the one primitive the core needs from the runtime below it
pub trait SyscallChannel: Send + Sync {
    fn make_syscall(&self, number: SyscallNumber, name: &'static str, args: [Word; 6]) -> i64;
}

impl<T: SyscallChannel + ?Sized> SyscallChannel for Arc<T> {
    fn make_syscall(&self, number: SyscallNumber, name: &'static str, args: [Word; 6]) -> i64 {
        (**self).make_syscall(number, name, args)
    }
}

impl<T: SyscallChannel + ?Sized> SyscallChannel for &T {
    fn make_syscall(&self, number: SyscallNumber, name: &'static str, args: [Word; 6]) -> i64 {
        (**self).make_syscall(number, name, args)
    }
}

pub struct RegistrationClient<C> {
    channel: C,
}

impl<C: SyscallChannel> RegistrationClient<C> {
    pub fn new(channel: C) -> Self {
        Self { channel }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Issue the request and return the raw status word.
    ///
    /// Performs no allocation and no logging, so it may run between fork and exec.
    pub fn register_raw(&self, registration: &Registration) -> i64 {
        self.channel
            .make_syscall(REGISTER_HANDLER, "register_handler", registration.to_words())
    }

    /// Issue the request and decode the status contract
    pub fn register(&self, registration: Registration) -> Result<(), RegistrationError> {
        let status = self.register_raw(&registration);
        match RegistrationError::from_status(status, registration) {
            None => {
                info!(
                    cage = %registration.target_cage,
                    syscall = %registration.syscall,
                    handler = %registration.handler,
                    grate = %registration.grate,
                    "Registration accepted"
                );
                Ok(())
            }
            Some(e) => {
                warn!(
                    cage = %registration.target_cage,
                    syscall = %registration.syscall,
                    status,
                    error = %e,
                    "Registration refused"
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{CageId, GrateId, HandlerIndex};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(SyscallNumber, [Word; 6])>>,
        status: i64,
    }

    impl SyscallChannel for Recorder {
        fn make_syscall(&self, number: SyscallNumber, _name: &'static str, args: [Word; 6]) -> i64 {
            self.calls.lock().push((number, args));
            self.status
        }
    }

    fn sample() -> Registration {
        Registration::new(
            CageId::new(20),
            SyscallNumber::new(50),
            HandlerIndex::new(1),
            GrateId::new(10),
        )
    }

    #[test]
    fn test_register_uses_reserved_number() {
        let client = RegistrationClient::new(Recorder::default());
        client.register(sample()).unwrap();

        let calls = client.channel().calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, REGISTER_HANDLER);
        assert_eq!(calls[0].1, sample().to_words());
    }

    #[test]
    fn test_register_decodes_failure() {
        let recorder = Recorder {
            status: -(nix::errno::Errno::ENOSYS as i64),
            ..Default::default()
        };
        let client = RegistrationClient::new(recorder);
        assert_eq!(client.register(sample()), Err(RegistrationError::Unsupported));
    }
}
