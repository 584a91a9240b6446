//! # Keel Execution Subsystem
//!
//! Blocking synchronization for a uniprocessor kernel:
//! - [`Lock`]: mutual exclusion with FIFO hand-off
//! - [`Condition`]: Mesa-style condition variables over a [`Lock`]
//! - [`Alarm`]: timed sleep driven by the substrate's tick callback
//! - [`Communicator`]: synchronous one-slot rendezvous
//!
//! ## Key Principle
//!
//! The only atomicity primitive is masking the tick callback. Every
//! "enqueue the caller, then block it" sequence happens inside one
//! interrupts-disabled section, so no wakeup can be lost in between.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

pub mod sync;
pub mod alarm;
pub mod communicator;

#[cfg(test)]
mod testing;

pub use sync::{Condition, Lock, WaitQueue};
pub use alarm::Alarm;
pub use communicator::Communicator;
pub use keel_hal::ThreadId;

/// Execution result type
pub type ExecResult<T> = Result<T, ExecError>;

/// Execution errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecError {
    /// The lock is held by another thread
    WouldBlock,
    /// The lock is already held by the calling thread
    AlreadyHeld,
    /// The calling thread does not hold the lock
    NotOwner,
}
