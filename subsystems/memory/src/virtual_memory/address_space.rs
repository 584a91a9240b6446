//! # Address Space
//!
//! A process's view of memory: a page table sized to the machine's physical
//! page count, filled by [`AddressSpace::load`] and emptied by
//! [`AddressSpace::unload`].
//!
//! Layout after a successful load:
//!
//! ```text
//! vpn 0 .. s          executable sections, contiguous from page 0
//! vpn s .. s+stack    user stack, growing down from the argument page
//! vpn s+stack         argument page: argc pointers, then the strings
//! ```
//!
//! Transfers between kernel buffers and user memory are all-or-nothing: a
//! range that leaves the address space or touches an invalid page moves
//! zero bytes.

use super::{LoadConfig, PageTable};
use crate::{MemError, MemResult, PagePool};
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use keel_hal::{Executable, MainMemory, UserContext, UserMemory};
use spin::Mutex;

/// Per-process virtual address space
pub struct AddressSpace {
    memory: Arc<MainMemory>,
    pool: Arc<PagePool>,
    config: LoadConfig,
    table: Mutex<PageTable>,
}

impl AddressSpace {
    /// Create an empty address space
    pub fn new(memory: Arc<MainMemory>, pool: Arc<PagePool>, config: LoadConfig) -> Self {
        let capacity = memory.num_pages();
        Self {
            memory,
            pool,
            config,
            table: Mutex::new(PageTable::new(capacity)),
        }
    }

    /// Bytes per page
    pub fn page_size(&self) -> usize {
        self.memory.page_size()
    }

    /// Size of the virtual address range in pages
    pub fn num_pages(&self) -> usize {
        self.table.lock().num_pages()
    }

    /// Number of valid translation entries
    pub fn mapped_pages(&self) -> usize {
        self.table.lock().mapped_pages()
    }

    /// Physical address backing `vaddr`
    pub fn translate(&self, vaddr: i32) -> Option<usize> {
        let vaddr = usize::try_from(vaddr).ok()?;
        let page_size = self.page_size();
        let table = self.table.lock();
        if vaddr >= table.num_pages() * page_size {
            return None;
        }
        table
            .lookup(vaddr / page_size)
            .map(|ppn| ppn * page_size + vaddr % page_size)
    }

    /// Map and fill the address space from `executable`, marshaling `args`
    /// into the argument page.
    ///
    /// On failure every page taken from the pool has been returned and the
    /// address space is empty.
    pub fn load(&self, executable: &dyn Executable, args: &[String]) -> MemResult<UserContext> {
        let mut table = self.table.lock();
        if table.num_pages() != 0 {
            return Err(MemError::AlreadyMapped);
        }

        let page_size = self.page_size();
        let sections = executable.sections();

        let mut section_pages = 0;
        for section in &sections {
            if section.first_vpn != section_pages {
                log::debug!("Load: section {} is not contiguous", section.name);
                return Err(MemError::Fragmented);
            }
            section_pages += section.page_count;
        }

        let args_size: usize = args
            .iter()
            .map(|arg| LoadConfig::POINTER_SIZE + arg.len() + 1)
            .sum();
        if args_size > page_size {
            log::debug!("Load: {} bytes of arguments exceed one page", args_size);
            return Err(MemError::ArgumentsTooLong);
        }

        let num_pages = section_pages + self.config.reserved_pages();
        if num_pages > table.capacity() {
            log::debug!("Load: {} pages exceed the page table", num_pages);
            return Err(MemError::TooLarge);
        }

        if let Err(error) = self.map_pages(&mut table, &sections, num_pages) {
            self.rollback(&mut table);
            return Err(error);
        }

        if let Err(error) = self.fill_pages(&table, executable, section_pages) {
            self.rollback(&mut table);
            return Err(error);
        }

        let arg_vpn = num_pages - LoadConfig::ARGUMENT_PAGES;
        if let Err(error) = self.marshal_args(&table, arg_vpn, args) {
            self.rollback(&mut table);
            return Err(error);
        }

        let arg_base = (arg_vpn * page_size) as u32;
        log::debug!(
            "Load: {} pages mapped, entry {:#x}, {} args",
            num_pages,
            executable.entry_point(),
            args.len()
        );
        Ok(UserContext {
            entry_pc: executable.entry_point(),
            initial_sp: arg_base,
            argc: args.len() as u32,
            argv: arg_base,
        })
    }

    fn map_pages(
        &self,
        table: &mut PageTable,
        sections: &[keel_hal::SectionDescriptor],
        num_pages: usize,
    ) -> MemResult<()> {
        table.set_num_pages(num_pages);
        for section in sections {
            for vpn in section.first_vpn..section.end_vpn() {
                let ppn = self.pool.acquire()?;
                table.map(vpn, ppn, section.read_only);
            }
        }

        let section_pages = num_pages - self.config.reserved_pages();
        for vpn in section_pages..num_pages {
            let ppn = self.pool.acquire()?;
            table.map(vpn, ppn, false);
            self.memory.zero_page(ppn)?;
        }
        Ok(())
    }

    fn fill_pages(
        &self,
        table: &PageTable,
        executable: &dyn Executable,
        section_pages: usize,
    ) -> MemResult<()> {
        for (index, section) in executable.sections().iter().enumerate() {
            log::debug!(
                "Load: initializing {} section ({} pages)",
                section.name,
                section.page_count
            );
            for page in 0..section.page_count {
                let vpn = section.first_vpn + page;
                if vpn >= section_pages {
                    return Err(MemError::Fragmented);
                }
                let ppn = table.lookup(vpn).ok_or(MemError::Fragmented)?;
                executable.load_page(index, page, ppn, &self.memory)?;
            }
        }
        Ok(())
    }

    fn marshal_args(&self, table: &PageTable, arg_vpn: usize, args: &[String]) -> MemResult<()> {
        let page_size = self.page_size();
        let base = arg_vpn * page_size;
        let mut page = vec![0u8; page_size];

        let mut string_offset = args.len() * LoadConfig::POINTER_SIZE;
        for (index, arg) in args.iter().enumerate() {
            let slot = index * LoadConfig::POINTER_SIZE;
            let pointer = (base + string_offset) as u32;
            page[slot..slot + LoadConfig::POINTER_SIZE].copy_from_slice(&pointer.to_le_bytes());

            let bytes = arg.as_bytes();
            page[string_offset..string_offset + bytes.len()].copy_from_slice(bytes);
            string_offset += bytes.len() + 1;
        }

        let ppn = table.lookup(arg_vpn).ok_or(MemError::OutOfMemory)?;
        self.memory.write(ppn * page_size, &page)?;
        Ok(())
    }

    fn rollback(&self, table: &mut PageTable) {
        for ppn in table.clear() {
            self.return_page(ppn);
        }
    }

    /// Give a page taken from a translation entry back to the pool.
    ///
    /// The entry owned the page, so the pool must accept it.
    fn return_page(&self, ppn: usize) {
        let result = self.pool.release(ppn);
        if let Err(error) = result {
            log::error!("Address space: pool refused mapped ppn {}: {}", ppn, error);
        }
        debug_assert!(result.is_ok(), "address space did not own ppn {}", ppn);
    }

    /// Return every mapped page to the pool. Returns the number of pages
    /// released; calling it again releases nothing.
    pub fn unload(&self) -> usize {
        let pages = self.table.lock().clear();
        for ppn in &pages {
            self.return_page(*ppn);
        }
        if !pages.is_empty() {
            log::debug!("Unload: {} pages returned", pages.len());
        }
        pages.len()
    }

    /// Is every byte of `[vaddr, vaddr + len)` backed by a valid page?
    pub fn is_mapped(&self, vaddr: i32, len: usize) -> bool {
        self.table
            .lock()
            .spans(vaddr, len, self.page_size())
            .is_some()
    }

    /// Copy user memory at `vaddr` into `buf`. Returns `buf.len()` or 0.
    pub fn read(&self, vaddr: i32, buf: &mut [u8]) -> usize {
        let mut table = self.table.lock();
        let Some(spans) = table.spans(vaddr, buf.len(), self.page_size()) else {
            return 0;
        };
        for span in &spans {
            let dest = &mut buf[span.offset..span.offset + span.len];
            if self.memory.read(span.paddr, dest).is_err() {
                return 0;
            }
            table.touch(span.vpn, false);
        }
        buf.len()
    }

    /// Copy `data` into user memory at `vaddr`. Returns `data.len()` or 0.
    pub fn write(&self, vaddr: i32, data: &[u8]) -> usize {
        let mut table = self.table.lock();
        let Some(spans) = table.spans(vaddr, data.len(), self.page_size()) else {
            return 0;
        };
        for span in &spans {
            let src = &data[span.offset..span.offset + span.len];
            if self.memory.write(span.paddr, src).is_err() {
                return 0;
            }
            table.touch(span.vpn, true);
        }
        data.len()
    }

    /// Read a NUL-terminated string of at most `max_len` bytes.
    ///
    /// Reads `max_len + 1` bytes; `None` if they contain no terminator, the
    /// transfer fails, or the bytes are not UTF-8.
    pub fn read_string(&self, vaddr: i32, max_len: usize) -> Option<String> {
        let mut buf = vec![0u8; max_len + 1];
        let count = self.read(vaddr, &mut buf);
        let end = buf[..count].iter().position(|byte| *byte == 0)?;
        buf.truncate(end);
        String::from_utf8(buf).ok()
    }

    /// Read a little-endian 32-bit word
    pub fn read_word(&self, vaddr: i32) -> Option<i32> {
        let mut buf = [0u8; 4];
        (self.read(vaddr, &mut buf) == buf.len()).then(|| i32::from_le_bytes(buf))
    }

    /// Write a little-endian 32-bit word
    pub fn write_word(&self, vaddr: i32, value: i32) -> bool {
        self.write(vaddr, &value.to_le_bytes()) == 4
    }

    #[cfg(test)]
    fn unmap_page(&self, vpn: usize) {
        if let Some(ppn) = self.table.lock().unmap(vpn) {
            self.return_page(ppn);
        }
    }
}

impl UserMemory for AddressSpace {
    fn read(&self, vaddr: i32, buf: &mut [u8]) -> usize {
        AddressSpace::read(self, vaddr, buf)
    }

    fn write(&self, vaddr: i32, data: &[u8]) -> usize {
        AddressSpace::write(self, vaddr, data)
    }
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        self.unload();
    }
}

impl core::fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AddressSpace")
            .field("num_pages", &self.num_pages())
            .field("mapped_pages", &self.mapped_pages())
            .finish()
    }
}
