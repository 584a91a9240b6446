//! # Keel Userspace Subsystem
//!
//! Processes and the system-call layer:
//! - [`Kernel`]: the context object every process shares (page pool, pid
//!   allocator, process table, collaborators)
//! - [`Process`]: one user program with its address space, parent/child
//!   links and exit-status bookkeeping
//! - [`ProcessVariant`]: pluggable load and trap handling, with
//!   [`UserVariant`] implementing the base system calls
//!
//! ## Lifecycle
//!
//! ```text
//! Created --load--> Loaded --start--> Running --exit/fault--> Exited
//! ```
//!
//! A parent owns its children; a child only holds a weak link back. A
//! child's exit status is written into its parent's table by the child
//! itself, before its thread finishes, and read back by `join`.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

pub mod config;
pub mod kernel;
pub mod process;
pub mod syscalls;
pub mod variant;

#[cfg(test)]
mod testing;

pub use config::KernelConfig;
pub use kernel::{Kernel, KernelStats, Machine};
pub use process::{Pid, Process, ProcessState, ProcessTable};
pub use syscalls::{Syscall, SyscallOutcome};
pub use variant::{ProcessVariant, UserVariant};

use keel_hal::HalError;
use keel_memory::MemError;

/// Userspace subsystem result type
pub type UserResult<T> = Result<T, UserError>;

/// Userspace subsystem errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserError {
    /// No executable with that name
    ProgramNotFound,
    /// The executable could not be parsed
    InvalidProgram,
    /// Building the address space failed
    Memory(MemError),
    /// A collaborator failed
    Hal(HalError),
    /// The pid does not name a child of the caller
    NotChild,
    /// The kernel already has a root process
    AlreadyBooted,
    /// The process is not in the right state for the operation
    InvalidState,
}

impl From<MemError> for UserError {
    fn from(error: MemError) -> Self {
        UserError::Memory(error)
    }
}

impl From<HalError> for UserError {
    fn from(error: HalError) -> Self {
        match error {
            HalError::NotFound => UserError::ProgramNotFound,
            HalError::Malformed => UserError::InvalidProgram,
            other => UserError::Hal(other),
        }
    }
}

impl core::fmt::Display for UserError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::ProgramNotFound => write!(f, "program not found"),
            Self::InvalidProgram => write!(f, "invalid program image"),
            Self::Memory(error) => write!(f, "address space: {}", error),
            Self::Hal(error) => write!(f, "hardware: {:?}", error),
            Self::NotChild => write!(f, "not a child process"),
            Self::AlreadyBooted => write!(f, "kernel already booted"),
            Self::InvalidState => write!(f, "invalid process state"),
        }
    }
}
