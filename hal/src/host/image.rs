//! In-memory executables.

use crate::loader::{Executable, ExecutableStore, SectionDescriptor};
use crate::{HalError, HalResult, MainMemory};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Executable image held in memory
#[derive(Debug, Clone, Default)]
pub struct RamImage {
    entry_point: u32,
    sections: Vec<SectionDescriptor>,
    contents: Vec<Vec<u8>>,
}

impl RamImage {
    /// Create an image with no sections
    pub fn new(entry_point: u32) -> Self {
        Self {
            entry_point,
            sections: Vec::new(),
            contents: Vec::new(),
        }
    }

    /// Builder: append a section. `data` is zero-padded to whole pages.
    pub fn with_section(
        mut self,
        name: &str,
        first_vpn: usize,
        page_count: usize,
        read_only: bool,
        data: &[u8],
    ) -> Self {
        self.sections
            .push(SectionDescriptor::new(name, first_vpn, page_count, read_only));
        self.contents.push(data.to_vec());
        self
    }

    /// Builder: a single `.text` section covering `page_count` pages
    pub fn with_text(self, page_count: usize, data: &[u8]) -> Self {
        let first_vpn = self.sections.last().map_or(0, SectionDescriptor::end_vpn);
        self.with_section(".text", first_vpn, page_count, true, data)
    }
}

impl Executable for RamImage {
    fn sections(&self) -> Vec<SectionDescriptor> {
        self.sections.clone()
    }

    fn entry_point(&self) -> u32 {
        self.entry_point
    }

    fn load_page(&self, section: usize, page: usize, ppn: usize, memory: &MainMemory) -> HalResult<()> {
        let descriptor = self.sections.get(section).ok_or(HalError::InvalidParameter)?;
        if page >= descriptor.page_count {
            return Err(HalError::InvalidParameter);
        }

        let page_size = memory.page_size();
        let mut buf = vec![0u8; page_size];
        let data = &self.contents[section];
        let start = page * page_size;
        if start < data.len() {
            let end = data.len().min(start + page_size);
            buf[..end - start].copy_from_slice(&data[start..end]);
        }
        memory.write(ppn * page_size, &buf)
    }
}

enum StoreEntry {
    Image(Arc<RamImage>),
    Malformed,
}

/// File-name keyed store of [`RamImage`]s
#[derive(Default)]
pub struct RamImageStore {
    files: spin::Mutex<BTreeMap<String, StoreEntry>>,
}

impl RamImageStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an executable
    pub fn insert(&self, name: &str, image: RamImage) {
        self.files
            .lock()
            .insert(String::from(name), StoreEntry::Image(Arc::new(image)));
    }

    /// Add a file that exists but cannot be loaded
    pub fn insert_malformed(&self, name: &str) {
        self.files.lock().insert(String::from(name), StoreEntry::Malformed);
    }
}

impl core::fmt::Debug for RamImageStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RamImageStore")
            .field("files", &self.files.lock().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ExecutableStore for RamImageStore {
    fn open(&self, name: &str) -> HalResult<Arc<dyn Executable>> {
        match self.files.lock().get(name) {
            Some(StoreEntry::Image(image)) => Ok(Arc::clone(image) as Arc<dyn Executable>),
            Some(StoreEntry::Malformed) => Err(HalError::Malformed),
            None => Err(HalError::NotFound),
        }
    }
}
