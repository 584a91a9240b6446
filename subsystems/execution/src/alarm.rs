//! # Alarm
//!
//! Timed sleep. Sleepers are kept in an unordered table that the tick
//! callback scans linearly; every entry whose deadline has passed is made
//! ready. Threads expiring on the same tick are woken in no particular
//! order.

use crate::ThreadId;
use alloc::sync::Arc;
use alloc::vec::Vec;
use keel_hal::{InterruptGuard, Substrate};
use spin::Mutex;

#[derive(Debug, Clone, Copy)]
struct Sleeper {
    thread: ThreadId,
    deadline: u64,
}

/// Timed wakeup service
pub struct Alarm {
    substrate: Arc<dyn Substrate>,
    sleepers: Mutex<Vec<Sleeper>>,
}

impl Alarm {
    /// Create the alarm and install its tick callback on `substrate`.
    ///
    /// The callback only holds a weak reference; once the alarm is dropped
    /// it does nothing.
    pub fn new(substrate: Arc<dyn Substrate>) -> Arc<Self> {
        let alarm = Arc::new(Self {
            substrate,
            sleepers: Mutex::new(Vec::new()),
        });

        let weak = Arc::downgrade(&alarm);
        alarm.substrate.set_tick_handler(Arc::new(move || {
            if let Some(alarm) = weak.upgrade() {
                alarm.timer_interrupt();
            }
        }));
        alarm
    }

    /// Tick callback: wake every expired sleeper, then yield.
    pub fn timer_interrupt(&self) {
        {
            let _guard = InterruptGuard::new(&*self.substrate);
            let now = self.substrate.now();

            let mut expired = Vec::new();
            self.sleepers.lock().retain(|sleeper| {
                if sleeper.deadline <= now {
                    expired.push(sleeper.thread);
                    false
                } else {
                    true
                }
            });

            for thread in expired {
                log::trace!("Alarm: waking {} at tick {}", thread, now);
                self.substrate.make_ready(thread);
            }
        }
        self.substrate.yield_now();
    }

    /// Block the calling thread for at least `ticks` ticks.
    ///
    /// The thread is woken by the first tick callback that observes the
    /// clock at or past its deadline. A zero-tick sleep still waits for the
    /// next callback.
    pub fn sleep_for(&self, ticks: u64) {
        let deadline = self.substrate.now().saturating_add(ticks);

        let guard = InterruptGuard::new(&*self.substrate);
        let thread = self.substrate.current_thread();
        self.sleepers.lock().push(Sleeper { thread, deadline });
        self.substrate.block_current();
        drop(guard);
    }

    /// Number of sleeping threads
    pub fn pending(&self) -> usize {
        self.sleepers.lock().len()
    }
}

impl core::fmt::Debug for Alarm {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Alarm")
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{boot, boot_with, spawn};
    use alloc::vec;
    use keel_hal::host::{HostConfig, HostOutcome};

    const INTERVAL: u64 = HostConfig::DEFAULT_TIMER_INTERVAL;

    #[test]
    fn test_never_wakes_early() {
        let outcome = boot(|substrate| {
            let alarm = Alarm::new(Arc::clone(&substrate));
            for ticks in [1, 499, 500, 1200, 2000] {
                let start = substrate.now();
                alarm.sleep_for(ticks);
                let woke = substrate.now();
                assert!(woke >= start + ticks, "woke at {} for {}+{}", woke, start, ticks);
                assert!(woke < start + ticks + INTERVAL);
            }
        });
        assert_eq!(outcome, HostOutcome::Completed);
    }

    #[test]
    fn test_zero_sleep_waits_for_next_tick() {
        let outcome = boot(|substrate| {
            let alarm = Alarm::new(Arc::clone(&substrate));
            let start = substrate.now();
            alarm.sleep_for(0);
            assert_eq!(substrate.now(), start + INTERVAL);
        });
        assert_eq!(outcome, HostOutcome::Completed);
    }

    #[test]
    fn test_sleepers_wake_by_deadline() {
        let outcome = boot(|substrate| {
            let alarm = Alarm::new(Arc::clone(&substrate));
            let order = Arc::new(Mutex::new(Vec::new()));

            let threads: Vec<_> = [2000u64, 500, 1000]
                .into_iter()
                .map(|ticks| {
                    let alarm = Arc::clone(&alarm);
                    let order = Arc::clone(&order);
                    spawn(&substrate, "sleeper", move || {
                        alarm.sleep_for(ticks);
                        order.lock().push(ticks);
                    })
                })
                .collect();

            substrate.yield_now();
            assert_eq!(alarm.pending(), 3);

            for thread in threads {
                substrate.join(thread);
            }
            assert_eq!(*order.lock(), vec![500, 1000, 2000]);
            assert_eq!(alarm.pending(), 0);
        });
        assert_eq!(outcome, HostOutcome::Completed);
    }

    #[test]
    fn test_busy_thread_still_gets_ticks() {
        let config = HostConfig::new().with_timer_interval(50);
        let outcome = boot_with(config, |substrate| {
            let alarm = Alarm::new(Arc::clone(&substrate));
            let done = Arc::new(Mutex::new(false));

            let flag = Arc::clone(&done);
            let sleeper_alarm = Arc::clone(&alarm);
            let sleeper = spawn(&substrate, "sleeper", move || {
                sleeper_alarm.sleep_for(200);
                *flag.lock() = true;
            });

            while !*done.lock() {
                substrate.yield_now();
            }
            substrate.join(sleeper);
            assert!(substrate.now() >= 200);
        });
        assert_eq!(outcome, HostOutcome::Completed);
    }
}
