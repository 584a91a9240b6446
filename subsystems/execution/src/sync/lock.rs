//! # Lock
//!
//! Blocking mutual exclusion. A contended acquire parks the caller; release
//! hands ownership straight to the oldest waiter, so a released lock is
//! never up for grabs while someone is queued on it.

use super::WaitQueue;
use crate::{ExecError, ExecResult, ThreadId};
use alloc::sync::Arc;
use keel_hal::{InterruptGuard, Substrate};
use spin::Mutex;

struct LockState {
    owner: Option<ThreadId>,
    waiters: WaitQueue,
}

/// Blocking lock
pub struct Lock {
    substrate: Arc<dyn Substrate>,
    state: Mutex<LockState>,
}

impl Lock {
    /// Create an unowned lock
    pub fn new(substrate: Arc<dyn Substrate>) -> Self {
        Self {
            substrate,
            state: Mutex::new(LockState {
                owner: None,
                waiters: WaitQueue::new(),
            }),
        }
    }

    /// Substrate the lock blocks threads on
    pub fn substrate(&self) -> &Arc<dyn Substrate> {
        &self.substrate
    }

    /// Acquire the lock, blocking while another thread holds it.
    ///
    /// Panics if the caller already holds it.
    pub fn acquire(&self) {
        let guard = InterruptGuard::new(&*self.substrate);
        let me = self.substrate.current_thread();

        let mut state = self.state.lock();
        assert_ne!(state.owner, Some(me), "{} acquired a lock it already holds", me);
        if state.owner.is_none() {
            state.owner = Some(me);
            return;
        }

        state.waiters.push(me);
        drop(state);
        self.substrate.block_current();
        drop(guard);
    }

    /// Acquire the lock only if that needs no waiting
    pub fn try_acquire(&self) -> ExecResult<()> {
        let _guard = InterruptGuard::new(&*self.substrate);
        let me = self.substrate.current_thread();

        let mut state = self.state.lock();
        match state.owner {
            None => {
                state.owner = Some(me);
                Ok(())
            }
            Some(owner) if owner == me => Err(ExecError::AlreadyHeld),
            Some(_) => Err(ExecError::WouldBlock),
        }
    }

    /// Release the lock, handing it to the oldest waiter.
    ///
    /// Panics if the caller does not hold it.
    pub fn release(&self) {
        if let Err(error) = self.try_release() {
            panic!("lock release by {}: {:?}", self.substrate.current_thread(), error);
        }
    }

    /// Release the lock, reporting misuse instead of panicking
    pub fn try_release(&self) -> ExecResult<()> {
        let _guard = InterruptGuard::new(&*self.substrate);
        let me = self.substrate.current_thread();

        let mut state = self.state.lock();
        if state.owner != Some(me) {
            return Err(ExecError::NotOwner);
        }
        state.owner = state.waiters.pop();
        let next = state.owner;
        drop(state);

        if let Some(next) = next {
            self.substrate.make_ready(next);
        }
        Ok(())
    }

    /// Does the calling thread hold the lock?
    pub fn is_held_by_current_thread(&self) -> bool {
        self.state.lock().owner == Some(self.substrate.current_thread())
    }

    /// Current owner
    pub fn owner(&self) -> Option<ThreadId> {
        self.state.lock().owner
    }

    /// Number of threads waiting to acquire
    pub fn waiters(&self) -> usize {
        self.state.lock().waiters.len()
    }
}

impl core::fmt::Debug for Lock {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Lock")
            .field("owner", &state.owner)
            .field("waiters", &state.waiters.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{boot, spawn};
    use alloc::vec;
    use alloc::vec::Vec;
    use keel_hal::host::HostOutcome;

    #[test]
    fn test_mutual_exclusion_across_yields() {
        let outcome = boot(|substrate| {
            let lock = Arc::new(Lock::new(Arc::clone(&substrate)));
            let counter = Arc::new(Mutex::new(0u32));

            let workers: Vec<_> = (0..3)
                .map(|_| {
                    let lock = Arc::clone(&lock);
                    let counter = Arc::clone(&counter);
                    let sub = Arc::clone(&substrate);
                    spawn(&substrate, "worker", move || {
                        for _ in 0..5 {
                            lock.acquire();
                            let seen = *counter.lock();
                            sub.yield_now();
                            *counter.lock() = seen + 1;
                            lock.release();
                            sub.yield_now();
                        }
                    })
                })
                .collect();

            for worker in workers {
                substrate.join(worker);
            }
            assert_eq!(*counter.lock(), 15);
            assert_eq!(lock.owner(), None);
        });
        assert_eq!(outcome, HostOutcome::Completed);
    }

    #[test]
    fn test_handoff_is_fifo() {
        let outcome = boot(|substrate| {
            let lock = Arc::new(Lock::new(Arc::clone(&substrate)));
            let order = Arc::new(Mutex::new(Vec::new()));

            lock.acquire();
            let threads: Vec<_> = (1..=3)
                .map(|tag| {
                    let lock = Arc::clone(&lock);
                    let order = Arc::clone(&order);
                    spawn(&substrate, "contender", move || {
                        lock.acquire();
                        order.lock().push(tag);
                        lock.release();
                    })
                })
                .collect();

            substrate.yield_now();
            assert_eq!(lock.waiters(), 3);
            lock.release();

            for thread in threads {
                substrate.join(thread);
            }
            assert_eq!(*order.lock(), vec![1, 2, 3]);
        });
        assert_eq!(outcome, HostOutcome::Completed);
    }

    #[test]
    fn test_try_acquire() {
        let outcome = boot(|substrate| {
            let lock = Arc::new(Lock::new(Arc::clone(&substrate)));
            assert_eq!(lock.try_acquire(), Ok(()));
            assert_eq!(lock.try_acquire(), Err(ExecError::AlreadyHeld));
            assert!(lock.is_held_by_current_thread());

            let other = Arc::clone(&lock);
            let thread = spawn(&substrate, "other", move || {
                assert_eq!(other.try_acquire(), Err(ExecError::WouldBlock));
                assert_eq!(other.try_release(), Err(ExecError::NotOwner));
                assert!(!other.is_held_by_current_thread());
            });
            substrate.join(thread);
            lock.release();
        });
        assert_eq!(outcome, HostOutcome::Completed);
    }

    #[test]
    fn test_release_without_holding_panics() {
        let outcome = boot(|substrate| {
            let lock = Lock::new(substrate);
            lock.release();
        });
        assert!(matches!(outcome, HostOutcome::Panicked(message) if message.contains("NotOwner")));
    }
}
