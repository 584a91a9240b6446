//! # Virtual Memory Management
//!
//! Per-process page tables and the address spaces built on them.

pub mod translation;
pub mod address_space;

pub use translation::{EntryFlags, PageTable, Span, TranslationEntry};
pub use address_space::AddressSpace;

use static_assertions::const_assert;

const_assert!(LoadConfig::DEFAULT_STACK_PAGES > 0);

/// Address space layout parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadConfig {
    /// Pages reserved for the user stack
    pub stack_pages: usize,
}

impl LoadConfig {
    /// Default stack size in pages
    pub const DEFAULT_STACK_PAGES: usize = 8;
    /// Pages reserved for marshaled arguments
    pub const ARGUMENT_PAGES: usize = 1;
    /// Size of one argument pointer in user memory
    pub const POINTER_SIZE: usize = 4;

    /// Create the default layout
    pub const fn new() -> Self {
        Self {
            stack_pages: Self::DEFAULT_STACK_PAGES,
        }
    }

    /// Builder: set the stack size
    pub const fn with_stack_pages(mut self, pages: usize) -> Self {
        self.stack_pages = pages;
        self
    }

    /// Pages added after the executable's sections
    pub const fn reserved_pages(&self) -> usize {
        self.stack_pages + Self::ARGUMENT_PAGES
    }
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self::new()
    }
}
