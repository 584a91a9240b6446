//! # Keel Memory Subsystem
//!
//! The memory subsystem provides:
//! - The global physical page pool
//! - Translation entries and per-process page tables
//! - Address spaces: loading executables, marshaling arguments, and
//!   copying bytes in and out of user memory
//!
//! ## Key Principle
//!
//! A physical page is owned by exactly one place at a time: the free pool
//! or one valid translation entry. Every failed operation returns the pages
//! it took.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

pub mod physical;
pub mod virtual_memory;

pub use physical::{PagePool, PoolStats};
pub use virtual_memory::{AddressSpace, EntryFlags, LoadConfig, PageTable, TranslationEntry};

use keel_hal::HalError;

/// Memory subsystem result type
pub type MemResult<T> = Result<T, MemError>;

/// Memory subsystem errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemError {
    /// No free physical page
    OutOfMemory,
    /// Page number outside the machine's range
    InvalidAddress,
    /// Page released while already free
    AlreadyFree,
    /// Address space already holds an image
    AlreadyMapped,
    /// Sections are not contiguous from virtual page 0
    Fragmented,
    /// Image needs more pages than a page table can hold
    TooLarge,
    /// Marshaled arguments do not fit in the argument page
    ArgumentsTooLong,
    /// The loader failed to copy a section
    LoadFailed(HalError),
}

impl From<HalError> for MemError {
    fn from(error: HalError) -> Self {
        MemError::LoadFailed(error)
    }
}

impl core::fmt::Display for MemError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "out of physical pages"),
            Self::InvalidAddress => write!(f, "physical page out of range"),
            Self::AlreadyFree => write!(f, "physical page already free"),
            Self::AlreadyMapped => write!(f, "address space already loaded"),
            Self::Fragmented => write!(f, "sections not contiguous"),
            Self::TooLarge => write!(f, "image larger than the page table"),
            Self::ArgumentsTooLong => write!(f, "arguments exceed one page"),
            Self::LoadFailed(error) => write!(f, "section load failed: {:?}", error),
        }
    }
}
