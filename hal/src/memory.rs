//! # Main Memory
//!
//! The machine's raw physical page array. Physical page `n` occupies bytes
//! `[n * page_size, (n + 1) * page_size)`.

use crate::{HalError, HalResult};
use alloc::vec;
use alloc::vec::Vec;
use spin::Mutex;
use static_assertions::const_assert;

const_assert!(MachineConfig::DEFAULT_PAGE_SIZE.is_power_of_two());
const_assert!(MachineConfig::DEFAULT_PHYS_PAGES > 0);

/// Machine geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineConfig {
    /// Bytes per page
    pub page_size: usize,
    /// Number of physical pages
    pub phys_pages: usize,
}

impl MachineConfig {
    /// Default page size in bytes
    pub const DEFAULT_PAGE_SIZE: usize = 1024;
    /// Default number of physical pages
    pub const DEFAULT_PHYS_PAGES: usize = 64;

    /// Create the default geometry
    pub const fn new() -> Self {
        Self {
            page_size: Self::DEFAULT_PAGE_SIZE,
            phys_pages: Self::DEFAULT_PHYS_PAGES,
        }
    }

    /// Builder: set the page size
    pub const fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Builder: set the number of physical pages
    pub const fn with_phys_pages(mut self, phys_pages: usize) -> Self {
        self.phys_pages = phys_pages;
        self
    }

    /// Total bytes of physical memory
    pub const fn memory_size(&self) -> usize {
        self.page_size * self.phys_pages
    }
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Physical memory array
pub struct MainMemory {
    config: MachineConfig,
    bytes: Mutex<Vec<u8>>,
}

impl MainMemory {
    /// Allocate zeroed physical memory with the given geometry
    pub fn new(config: MachineConfig) -> Self {
        log::info!(
            "Main memory: {} pages of {} bytes",
            config.phys_pages,
            config.page_size
        );
        Self {
            config,
            bytes: Mutex::new(vec![0; config.memory_size()]),
        }
    }

    /// Bytes per page
    pub fn page_size(&self) -> usize {
        self.config.page_size
    }

    /// Number of physical pages
    pub fn num_pages(&self) -> usize {
        self.config.phys_pages
    }

    /// Machine geometry
    pub fn config(&self) -> MachineConfig {
        self.config
    }

    /// Copy bytes out of physical memory starting at `paddr`
    pub fn read(&self, paddr: usize, buf: &mut [u8]) -> HalResult<()> {
        let end = self.check_range(paddr, buf.len())?;
        buf.copy_from_slice(&self.bytes.lock()[paddr..end]);
        Ok(())
    }

    /// Copy bytes into physical memory starting at `paddr`
    pub fn write(&self, paddr: usize, data: &[u8]) -> HalResult<()> {
        let end = self.check_range(paddr, data.len())?;
        self.bytes.lock()[paddr..end].copy_from_slice(data);
        Ok(())
    }

    /// Fill one physical page with zeroes
    pub fn zero_page(&self, ppn: usize) -> HalResult<()> {
        let start = ppn
            .checked_mul(self.page_size())
            .ok_or(HalError::InvalidAddress)?;
        let end = self.check_range(start, self.page_size())?;
        self.bytes.lock()[start..end].fill(0);
        Ok(())
    }

    fn check_range(&self, paddr: usize, len: usize) -> HalResult<usize> {
        match paddr.checked_add(len) {
            Some(end) if end <= self.config.memory_size() => Ok(end),
            _ => Err(HalError::InvalidAddress),
        }
    }
}

impl core::fmt::Debug for MainMemory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MainMemory")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
