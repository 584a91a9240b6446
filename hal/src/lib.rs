//! # Keel HAL - Hardware Abstraction Layer
//!
//! This crate defines the interfaces through which the kernel core reaches
//! everything it does not own itself:
//! - The execution substrate (threads, ticks, interrupt masking)
//! - Main memory (the raw physical page array)
//! - The console byte stream
//! - The binary loader
//! - The processor that raises traps while running user programs
//!
//! ## Design Philosophy
//!
//! The kernel core never touches hardware directly. Every collaborator is a
//! trait, so the same kernel runs on a real machine port or on the
//! in-process implementations behind the `host` feature.

#![cfg_attr(not(any(test, feature = "host")), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

pub mod substrate;
pub mod memory;
pub mod console;
pub mod loader;
pub mod trap;

#[cfg(any(test, feature = "host"))]
pub mod host;

pub use substrate::{InterruptGuard, InterruptState, Substrate, ThreadEntry, TickHandler};
pub use memory::{MachineConfig, MainMemory};
pub use console::Console;
pub use loader::{Executable, ExecutableStore, SectionDescriptor};
pub use trap::{ExceptionCause, Processor, TrapAction, TrapFrame, TrapHandler, UserContext, UserMemory};

/// Result type for HAL operations
pub type HalResult<T> = Result<T, HalError>;

/// Errors that can occur in HAL operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalError {
    /// The operation is not supported by this collaborator
    NotSupported,
    /// Invalid parameter provided
    InvalidParameter,
    /// Address is outside the backing store
    InvalidAddress,
    /// Resource could not be allocated
    OutOfMemory,
    /// The named object does not exist
    NotFound,
    /// The object exists but its contents are unusable
    Malformed,
    /// The collaborator reported an I/O failure
    HardwareError,
}

/// Identity of a thread owned by the execution substrate
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(u64);

impl ThreadId {
    /// Create a thread ID from its raw value
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The ID reported when no thread is running
    pub const fn idle() -> Self {
        Self(0)
    }

    /// Get the raw ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl core::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "thread#{}", self.0)
    }
}
