//! # Communicator
//!
//! Synchronous rendezvous over a single slot. A sender waits for the slot
//! to empty, deposits its value, and then waits until that very value has
//! been taken, so `send` returns only after a matching `receive`. Deposits
//! and consumptions are numbered; since the slot holds one value at a time
//! they are consumed in deposit order, and a sender knows its value is gone
//! once the consumed count reaches its ticket.

use crate::sync::{Condition, Lock};
use alloc::sync::Arc;
use keel_hal::Substrate;
use spin::Mutex;

struct Slot<T> {
    value: Option<T>,
    deposited: u64,
    consumed: u64,
}

/// Synchronous one-slot channel
pub struct Communicator<T: Send> {
    lock: Arc<Lock>,
    speakers: Condition,
    listeners: Condition,
    slot: Mutex<Slot<T>>,
}

impl<T: Send> Communicator<T> {
    /// Create an empty channel
    pub fn new(substrate: Arc<dyn Substrate>) -> Self {
        let lock = Arc::new(Lock::new(substrate));
        Self {
            speakers: Condition::new(Arc::clone(&lock)),
            listeners: Condition::new(Arc::clone(&lock)),
            lock,
            slot: Mutex::new(Slot {
                value: None,
                deposited: 0,
                consumed: 0,
            }),
        }
    }

    /// Hand `value` to a receiver, blocking until one has taken it
    pub fn send(&self, value: T) {
        self.lock.acquire();

        while self.slot.lock().value.is_some() {
            self.listeners.broadcast();
            self.speakers.wait();
        }

        let ticket = {
            let mut slot = self.slot.lock();
            slot.value = Some(value);
            slot.deposited += 1;
            slot.deposited
        };
        self.listeners.broadcast();

        while self.slot.lock().consumed < ticket {
            self.speakers.wait();
        }

        self.lock.release();
    }

    /// Take the next value, blocking until a sender provides one
    pub fn receive(&self) -> T {
        self.lock.acquire();

        let value = loop {
            let taken = {
                let mut slot = self.slot.lock();
                let taken = slot.value.take();
                if taken.is_some() {
                    slot.consumed += 1;
                }
                taken
            };
            match taken {
                Some(value) => break value,
                None => self.listeners.wait(),
            }
        };
        self.speakers.broadcast();

        self.lock.release();
        value
    }

    /// Number of values delivered so far
    pub fn delivered(&self) -> u64 {
        self.slot.lock().consumed
    }
}

impl<T: Send> core::fmt::Debug for Communicator<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let slot = self.slot.lock();
        f.debug_struct("Communicator")
            .field("pending", &slot.value.is_some())
            .field("deposited", &slot.deposited)
            .field("consumed", &slot.consumed)
            .finish()
    }
}
