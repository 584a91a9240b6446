//! # Binary Loader
//!
//! Executables are a list of sections, each a run of virtual pages. The
//! loader copies one page of a section at a time into a physical page
//! chosen by the kernel.

use crate::{HalResult, MainMemory};
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

/// One loadable section of an executable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionDescriptor {
    /// Section name, for diagnostics
    pub name: String,
    /// First virtual page the section occupies
    pub first_vpn: usize,
    /// Number of pages in the section
    pub page_count: usize,
    /// Must the pages be mapped read-only?
    pub read_only: bool,
}

impl SectionDescriptor {
    /// Create a section descriptor
    pub fn new(name: &str, first_vpn: usize, page_count: usize, read_only: bool) -> Self {
        Self {
            name: String::from(name),
            first_vpn,
            page_count,
            read_only,
        }
    }

    /// One past the last virtual page of the section
    pub fn end_vpn(&self) -> usize {
        self.first_vpn + self.page_count
    }
}

/// An opened executable image
pub trait Executable: Send + Sync {
    /// Sections in load order
    fn sections(&self) -> Vec<SectionDescriptor>;

    /// Initial program counter
    fn entry_point(&self) -> u32;

    /// Copy page `page` of section `section` into physical page `ppn`
    fn load_page(&self, section: usize, page: usize, ppn: usize, memory: &MainMemory) -> HalResult<()>;
}

/// Source of executables, looked up by file name
pub trait ExecutableStore: Send + Sync {
    /// Open an executable.
    ///
    /// Fails with [`crate::HalError::NotFound`] if there is no such file and
    /// with [`crate::HalError::Malformed`] if it is not a valid image.
    fn open(&self, name: &str) -> HalResult<Arc<dyn Executable>>;
}
