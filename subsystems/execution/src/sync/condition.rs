//! # Condition Variables
//!
//! Mesa semantics: a signaled thread only becomes ready, and must re-check
//! its predicate once it holds the lock again. Waiters are woken in the
//! order they started waiting.
//!
//! ```text
//! lock.acquire();
//! while !predicate() {
//!     condition.wait();
//! }
//! // ... use the state ...
//! lock.release();
//! ```

use super::{Lock, WaitQueue};
use alloc::sync::Arc;
use keel_hal::InterruptGuard;
use spin::Mutex;

/// Condition variable bound to one [`Lock`]
pub struct Condition {
    lock: Arc<Lock>,
    waiters: Mutex<WaitQueue>,
}

impl Condition {
    /// Create a condition variable protected by `lock`
    pub fn new(lock: Arc<Lock>) -> Self {
        Self {
            lock,
            waiters: Mutex::new(WaitQueue::new()),
        }
    }

    /// The lock protecting this condition
    pub fn lock(&self) -> &Arc<Lock> {
        &self.lock
    }

    fn assert_held(&self, operation: &str) {
        assert!(
            self.lock.is_held_by_current_thread(),
            "condition {} without holding its lock",
            operation
        );
    }

    /// Release the lock, sleep until signaled, then reacquire the lock.
    ///
    /// The caller must hold the lock.
    pub fn wait(&self) {
        self.assert_held("wait");
        let substrate = self.lock.substrate();

        let guard = InterruptGuard::new(&**substrate);
        self.lock.release();
        self.waiters.lock().push(substrate.current_thread());
        substrate.block_current();
        drop(guard);

        self.lock.acquire();
    }

    /// Wake the oldest waiter, if any. Returns whether one was woken.
    ///
    /// The caller must hold the lock.
    pub fn signal(&self) -> bool {
        self.assert_held("signal");
        let substrate = self.lock.substrate();

        let _guard = InterruptGuard::new(&**substrate);
        let next = self.waiters.lock().pop();
        match next {
            Some(thread) => {
                substrate.make_ready(thread);
                true
            }
            None => false,
        }
    }

    /// Wake every waiter. Returns how many were woken.
    ///
    /// The caller must hold the lock.
    pub fn broadcast(&self) -> usize {
        let mut woken = 0;
        while self.signal() {
            woken += 1;
        }
        woken
    }

    /// Number of threads waiting
    pub fn waiters(&self) -> usize {
        self.waiters.lock().len()
    }
}

impl core::fmt::Debug for Condition {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Condition")
            .field("waiters", &self.waiters())
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
    use keel_hal::Substrate;

    fn setup(substrate: &Arc<dyn Substrate>) -> (Arc<Lock>, Arc<Condition>) {
        let lock = Arc::new(Lock::new(Arc::clone(substrate)));
        let condition = Arc::new(Condition::new(Arc::clone(&lock)));
        (lock, condition)
    }

    fn spawn_waiters(
        substrate: &Arc<dyn Substrate>,
        condition: &Arc<Condition>,
        order: &Arc<Mutex<Vec<u32>>>,
        count: u32,
    ) -> Vec<keel_hal::ThreadId> {
        (1..=count)
            .map(|tag| {
                let condition = Arc::clone(condition);
                let order = Arc::clone(order);
                spawn(substrate, "waiter", move || {
                    condition.lock().acquire();
                    condition.wait();
                    order.lock().push(tag);
                    condition.lock().release();
                })
            })
            .collect()
    }

    #[test]
    fn test_signal_wakes_in_fifo_order() {
        let outcome = boot(|substrate| {
            let (lock, condition) = setup(&substrate);
            let order = Arc::new(Mutex::new(Vec::new()));
            let threads = spawn_waiters(&substrate, &condition, &order, 3);

            substrate.yield_now();
            assert_eq!(condition.waiters(), 3);

            lock.acquire();
            assert!(condition.signal());
            assert_eq!(condition.waiters(), 2);
            assert!(condition.signal());
            assert!(condition.signal());
            assert!(!condition.signal());
            lock.release();

            for thread in threads {
                substrate.join(thread);
            }
            assert_eq!(*order.lock(), vec![1, 2, 3]);
        });
        assert_eq!(outcome, HostOutcome::Completed);
    }

    #[test]
    fn test_broadcast_drains_queue() {
        let outcome = boot(|substrate| {
            let (lock, condition) = setup(&substrate);
            let order = Arc::new(Mutex::new(Vec::new()));
            let threads = spawn_waiters(&substrate, &condition, &order, 4);

            substrate.yield_now();
            lock.acquire();
            assert_eq!(condition.broadcast(), 4);
            assert_eq!(condition.waiters(), 0);
            assert_eq!(condition.broadcast(), 0);
            lock.release();

            for thread in threads {
                substrate.join(thread);
            }
            assert_eq!(order.lock().len(), 4);
        });
        assert_eq!(outcome, HostOutcome::Completed);
    }

    #[test]
    fn test_signal_without_waiters_is_noop() {
        let outcome = boot(|substrate| {
            let (lock, condition) = setup(&substrate);
            lock.acquire();
            assert!(!condition.signal());
            assert_eq!(condition.broadcast(), 0);
            lock.release();
        });
        assert_eq!(outcome, HostOutcome::Completed);
    }

    #[test]
    fn test_predicate_loop_sees_update() {
        let outcome = boot(|substrate| {
            let (lock, condition) = setup(&substrate);
            let ready = Arc::new(Mutex::new(false));

            let flag = Arc::clone(&ready);
            let waiter_condition = Arc::clone(&condition);
            let waiter = spawn(&substrate, "waiter", move || {
                waiter_condition.lock().acquire();
                while !*flag.lock() {
                    waiter_condition.wait();
                }
                waiter_condition.lock().release();
            });

            for _ in 0..3 {
                substrate.yield_now();
                lock.acquire();
                condition.signal();
                lock.release();
            }

            lock.acquire();
            *ready.lock() = true;
            condition.signal();
            lock.release();
            substrate.join(waiter);
        });
        assert_eq!(outcome, HostOutcome::Completed);
    }

    #[test]
    fn test_wait_without_lock_panics() {
        let outcome = boot(|substrate| {
            let (_lock, condition) = setup(&substrate);
            condition.wait();
        });
        assert!(matches!(outcome, HostOutcome::Panicked(message) if message.contains("without holding")));
    }
}
