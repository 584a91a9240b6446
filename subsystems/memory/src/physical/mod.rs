//! # Physical Memory Management
//!
//! The global pool of free physical pages.

pub mod pool;

pub use pool::PagePool;

/// Page pool statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Total pages managed
    pub total_pages: usize,
    /// Pages currently free
    pub free_pages: usize,
    /// Fewest free pages ever observed
    pub low_water: usize,
    /// Successful acquisitions
    pub allocations: u64,
    /// Successful releases
    pub releases: u64,
    /// Rejected releases
    pub rejected: u64,
}
