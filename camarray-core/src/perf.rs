//! CPU frequency lock held around latency-sensitive work.

use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, error};
use thiserror::Error;

/// A counted request to keep the CPU at its maximum frequency.
///
/// Any number of holders may hold the lock at once; the frequency floor is
/// lifted only while at least one acquisition is outstanding.
pub trait PerformanceLock {
    type Error: Debug;

    fn acquire(&self) -> Result<(), Self::Error>;

    fn release(&self) -> Result<(), Self::Error>;

    /// Acquire and return a guard that releases on drop.
    fn hold(&self) -> Result<PerfLockGuard<'_, Self>, Self::Error>
    where
        Self: Sized,
    {
        self.acquire()?;
        Ok(PerfLockGuard { lock: self })
    }
}

impl<L: PerformanceLock> PerformanceLock for Arc<L> {
    type Error = L::Error;

    fn acquire(&self) -> Result<(), Self::Error> {
        (**self).acquire()
    }

    fn release(&self) -> Result<(), Self::Error> {
        (**self).release()
    }
}

#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct PerfLockGuard<'a, L: PerformanceLock> {
    lock: &'a L,
}

impl<L: PerformanceLock> Drop for PerfLockGuard<'_, L> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.release() {
            error!("Failed to release performance lock: {:?}", e);
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LockError {
    #[error("performance lock released more times than it was acquired")]
    Underflow,
}

/// In-process reference count with the same semantics as the ESP-IDF power
/// management lock. Used on hosts and in tests.
#[derive(Debug)]
pub struct CountedLock {
    name: &'static str,
    holders: AtomicUsize,
}

impl CountedLock {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            holders: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn holders(&self) -> usize {
        self.holders.load(Ordering::Acquire)
    }

    pub fn is_held(&self) -> bool {
        self.holders() > 0
    }
}

impl PerformanceLock for CountedLock {
    type Error = LockError;

    fn acquire(&self) -> Result<(), LockError> {
        if self.holders.fetch_add(1, Ordering::AcqRel) == 0 {
            debug!("{}: frequency floor raised", self.name);
        }
        Ok(())
    }

    fn release(&self) -> Result<(), LockError> {
        let previous = self
            .holders
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .map_err(|_| LockError::Underflow)?;
        if previous == 1 {
            debug!("{}: frequency floor lowered", self.name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_guard_releases_on_drop() {
        let lock = CountedLock::new("camera");
        {
            let _guard = lock.hold().unwrap();
            assert!(lock.is_held());
        }
        assert_eq!(lock.holders(), 0);
    }

    #[test]
    fn test_nested_holders() {
        let lock = CountedLock::new("camera");
        let outer = lock.hold().unwrap();
        let inner = lock.hold().unwrap();
        assert_eq!(lock.holders(), 2);

        drop(inner);
        assert!(lock.is_held());
        drop(outer);
        assert!(!lock.is_held());
    }

    #[test]
    fn test_release_without_acquire_is_underflow() {
        let lock = CountedLock::new("camera");
        assert_eq!(lock.release(), Err(LockError::Underflow));
        assert_eq!(lock.holders(), 0);
    }

    #[test]
    fn test_shared_across_threads() {
        let lock = Arc::new(CountedLock::new("camera"));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lock = lock.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        let _guard = lock.hold().unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(lock.holders(), 0);
        assert_eq!(lock.name(), "camera");
    }
}
