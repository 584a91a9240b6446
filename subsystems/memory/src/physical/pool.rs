//! # Physical Page Pool
//!
//! Free list of physical page numbers, filled once at boot with every page
//! of the machine. A membership bitmap rejects double releases.

use crate::{MemError, MemResult};
use super::PoolStats;
use alloc::collections::VecDeque;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use spin::Mutex;

struct FreeList {
    pages: VecDeque<usize>,
    is_free: Vec<bool>,
}

/// Global physical page allocator
pub struct PagePool {
    free: Mutex<FreeList>,
    total_pages: usize,
    low_water: AtomicUsize,
    allocations: AtomicU64,
    releases: AtomicU64,
    rejected: AtomicU64,
}

impl PagePool {
    /// Create a pool holding pages `0..total_pages`
    pub fn new(total_pages: usize) -> Self {
        log::info!("Page pool: {} physical pages", total_pages);
        Self {
            free: Mutex::new(FreeList {
                pages: (0..total_pages).collect(),
                is_free: vec![true; total_pages],
            }),
            total_pages,
            low_water: AtomicUsize::new(total_pages),
            allocations: AtomicU64::new(0),
            releases: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Take one free page
    pub fn acquire(&self) -> MemResult<usize> {
        let mut free = self.free.lock();
        let ppn = free.pages.pop_front().ok_or(MemError::OutOfMemory)?;
        free.is_free[ppn] = false;
        self.low_water.fetch_min(free.pages.len(), Ordering::Relaxed);
        drop(free);

        self.allocations.fetch_add(1, Ordering::Relaxed);
        log::trace!("Page pool: acquired ppn {}", ppn);
        Ok(ppn)
    }

    /// Return a page to the pool.
    ///
    /// Pages outside the machine's range and pages that are already free
    /// are rejected and leave the pool unchanged.
    pub fn release(&self, ppn: usize) -> MemResult<()> {
        let result = self.try_release(ppn);
        match result {
            Ok(()) => {
                self.releases.fetch_add(1, Ordering::Relaxed);
                log::trace!("Page pool: released ppn {}", ppn);
            }
            Err(error) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                log::warn!("Page pool: rejected release of ppn {}: {}", ppn, error);
            }
        }
        result
    }

    fn try_release(&self, ppn: usize) -> MemResult<()> {
        let mut free = self.free.lock();
        match free.is_free.get(ppn) {
            None => Err(MemError::InvalidAddress),
            Some(true) => Err(MemError::AlreadyFree),
            Some(false) => {
                free.is_free[ppn] = true;
                free.pages.push_back(ppn);
                Ok(())
            }
        }
    }

    /// Number of free pages
    pub fn free_pages(&self) -> usize {
        self.free.lock().pages.len()
    }

    /// Number of pages the pool manages
    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    /// Is `ppn` currently in the pool?
    pub fn is_free(&self, ppn: usize) -> bool {
        self.free.lock().is_free.get(ppn).copied().unwrap_or(false)
    }

    /// Statistics snapshot
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            total_pages: self.total_pages,
            free_pages: self.free_pages(),
            low_water: self.low_water.load(Ordering::Relaxed),
            allocations: self.allocations.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

impl core::fmt::Debug for PagePool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PagePool")
            .field("total_pages", &self.total_pages)
            .field("free_pages", &self.free_pages())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhaustion() {
        let pool = PagePool::new(3);
        let mut taken = Vec::new();
        for _ in 0..3 {
            taken.push(pool.acquire().unwrap());
        }
        assert_eq!(pool.acquire(), Err(MemError::OutOfMemory));

        taken.sort_unstable();
        assert_eq!(taken, vec![0, 1, 2]);
        assert_eq!(pool.stats().low_water, 0);
    }

    #[test]
    fn test_release_rejections() {
        let pool = PagePool::new(4);
        let ppn = pool.acquire().unwrap();

        assert_eq!(pool.release(4), Err(MemError::InvalidAddress));
        assert_eq!(pool.release(usize::MAX), Err(MemError::InvalidAddress));
        assert_eq!(pool.free_pages(), 3);

        pool.release(ppn).unwrap();
        assert_eq!(pool.release(ppn), Err(MemError::AlreadyFree));
        assert_eq!(pool.free_pages(), 4);

        let stats = pool.stats();
        assert_eq!(stats.releases, 1);
        assert_eq!(stats.rejected, 3);
    }

    #[test]
    fn test_conservation() {
        let pool = PagePool::new(16);
        let mut held = Vec::new();
        for round in 0..40 {
            if round % 3 == 2 {
                if let Some(ppn) = held.pop() {
                    pool.release(ppn).unwrap();
                }
            } else if let Ok(ppn) = pool.acquire() {
                assert!(!held.contains(&ppn));
                held.push(ppn);
            }
            assert_eq!(held.len() + pool.free_pages(), pool.total_pages());
            assert!(held.iter().all(|ppn| !pool.is_free(*ppn)));
        }
    }
}
