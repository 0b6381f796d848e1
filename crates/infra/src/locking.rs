//! Bounded exclusive access to documents and balance keys.

use std::sync::{Mutex, MutexGuard, TryLockError};

use tracing::debug;

use crate::config::LockPolicy;
use crate::error::PostingError;

/// Acquire `mutex`, retrying with backoff while another transition holds it.
///
/// Exhausting the policy yields the retryable `ConcurrentModification`; a
/// poisoned lock is a `Persistence` failure.
pub fn acquire<'a, T>(
    mutex: &'a Mutex<T>,
    policy: &LockPolicy,
    what: &dyn core::fmt::Display,
) -> Result<MutexGuard<'a, T>, PostingError> {
    let mut attempts = 0u32;
    loop {
        match mutex.try_lock() {
            Ok(guard) => return Ok(guard),
            Err(TryLockError::WouldBlock) => {
                attempts += 1;
                if attempts >= policy.max_attempts {
                    debug!(%what, attempts, "lock retries exhausted");
                    return Err(PostingError::ConcurrentModification(format!(
                        "{what} is held by another transition"
                    )));
                }
                std::thread::sleep(policy.backoff);
            }
            Err(TryLockError::Poisoned(_)) => {
                return Err(PostingError::Persistence(format!("{what} lock poisoned")));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn contention_exhausts_into_retryable_error() {
        let mutex = Mutex::new(0);
        let _held = mutex.lock().unwrap();
        let policy = LockPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(1),
        };

        let err = acquire(&mutex, &policy, &"balance").unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn free_lock_is_acquired_immediately() {
        let mutex = Mutex::new(7);
        let guard = acquire(&mutex, &LockPolicy::default(), &"doc").unwrap();
        assert_eq!(*guard, 7);
    }
}
