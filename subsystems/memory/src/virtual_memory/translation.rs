//! # Translation Entries
//!
//! One entry per virtual page. The table only hands out spans when every
//! page a transfer touches is valid.

use alloc::vec::Vec;
use bitflags::bitflags;

bitflags! {
    /// Translation entry flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EntryFlags: u8 {
        /// The mapping is in use
        const VALID = 1 << 0;
        /// User writes are not permitted
        const READ_ONLY = 1 << 1;
        /// The page has been accessed
        const USED = 1 << 2;
        /// The page has been written
        const DIRTY = 1 << 3;
    }
}

/// Mapping of one virtual page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslationEntry {
    /// Virtual page number
    pub vpn: usize,
    /// Physical page number, meaningful only while valid
    pub ppn: usize,
    /// Flags
    pub flags: EntryFlags,
}

impl TranslationEntry {
    /// An invalid entry for `vpn`
    pub const fn invalid(vpn: usize) -> Self {
        Self {
            vpn,
            ppn: 0,
            flags: EntryFlags::empty(),
        }
    }

    /// Is the mapping in use?
    pub fn is_valid(&self) -> bool {
        self.flags.contains(EntryFlags::VALID)
    }

    /// Is the page read-only?
    pub fn is_read_only(&self) -> bool {
        self.flags.contains(EntryFlags::READ_ONLY)
    }
}

/// Contiguous piece of a transfer that lies within one page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    /// Virtual page the piece lies in
    pub vpn: usize,
    /// Physical address of the first byte
    pub paddr: usize,
    /// Offset of the piece within the caller's buffer
    pub offset: usize,
    /// Length in bytes
    pub len: usize,
}

/// Fixed-capacity page table
#[derive(Debug, Clone)]
pub struct PageTable {
    entries: Vec<TranslationEntry>,
    num_pages: usize,
}

impl PageTable {
    /// Create a table of `capacity` invalid entries
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: (0..capacity).map(TranslationEntry::invalid).collect(),
            num_pages: 0,
        }
    }

    /// Maximum number of virtual pages
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Size of the virtual address range in pages
    pub fn num_pages(&self) -> usize {
        self.num_pages
    }

    /// Set the size of the virtual address range
    pub fn set_num_pages(&mut self, num_pages: usize) {
        self.num_pages = num_pages.min(self.capacity());
    }

    /// Entry for `vpn`, valid or not
    pub fn entry(&self, vpn: usize) -> Option<&TranslationEntry> {
        self.entries.get(vpn)
    }

    /// Install a valid mapping
    pub fn map(&mut self, vpn: usize, ppn: usize, read_only: bool) -> bool {
        let Some(entry) = self.entries.get_mut(vpn) else {
            return false;
        };
        entry.ppn = ppn;
        entry.flags = EntryFlags::VALID;
        entry.flags.set(EntryFlags::READ_ONLY, read_only);
        true
    }

    /// Invalidate `vpn`, returning the page it mapped
    pub fn unmap(&mut self, vpn: usize) -> Option<usize> {
        let entry = self.entries.get_mut(vpn)?;
        if !entry.is_valid() {
            return None;
        }
        entry.flags = EntryFlags::empty();
        Some(entry.ppn)
    }

    /// Invalidate every entry, returning the pages they mapped
    pub fn clear(&mut self) -> Vec<usize> {
        self.num_pages = 0;
        (0..self.entries.len())
            .filter_map(|vpn| self.unmap(vpn))
            .collect()
    }

    /// Number of valid entries
    pub fn mapped_pages(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_valid()).count()
    }

    /// Physical page backing `vpn`, if valid
    pub fn lookup(&self, vpn: usize) -> Option<usize> {
        self.entries
            .get(vpn)
            .filter(|entry| entry.is_valid())
            .map(|entry| entry.ppn)
    }

    /// Split `[vaddr, vaddr + len)` into per-page spans.
    ///
    /// `None` if the range starts below zero, ends past the address range,
    /// or touches an invalid page.
    pub fn spans(&self, vaddr: i32, len: usize, page_size: usize) -> Option<Vec<Span>> {
        let start = usize::try_from(vaddr).ok()?;
        let end = start.checked_add(len)?;
        if end > self.num_pages * page_size {
            return None;
        }

        let mut spans = Vec::new();
        let mut cursor = start;
        while cursor < end {
            let vpn = cursor / page_size;
            let page_offset = cursor % page_size;
            let ppn = self.lookup(vpn)?;
            let len = (page_size - page_offset).min(end - cursor);
            spans.push(Span {
                vpn,
                paddr: ppn * page_size + page_offset,
                offset: cursor - start,
                len,
            });
            cursor += len;
        }
        Some(spans)
    }

    /// Record an access to `vpn`
    pub fn touch(&mut self, vpn: usize, dirty: bool) {
        if let Some(entry) = self.entries.get_mut(vpn) {
            entry.flags.insert(EntryFlags::USED);
            if dirty {
                entry.flags.insert(EntryFlags::DIRTY);
            }
        }
    }
}
