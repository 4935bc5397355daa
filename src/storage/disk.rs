use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Result, StoreError};
use crate::storage::page::PageId;

/// Page-granular file manager over `data.pages`.
///
/// Pages are created on first write; reads past the end of the file return
/// zeroed pages. Page ids are never reused online.
pub struct DiskManager {
    file: Mutex<File>,
    page_size: usize,
    page_count: AtomicU64,
}

impl DiskManager {
    pub fn open(path: &Path, page_size: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        let len = file.metadata()?.len();
        let page_count = len.div_ceil(page_size as u64);

        Ok(Self {
            file: Mutex::new(file),
            page_size,
            page_count: AtomicU64::new(page_count),
        })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of pages allocated so far, superblock included.
    pub fn page_count(&self) -> u64 {
        self.page_count.load(Ordering::Acquire)
    }

    /// Reserve a fresh page id. The page materializes on first write.
    pub fn allocate_page(&self) -> PageId {
        self.page_count.fetch_add(1, Ordering::AcqRel)
    }

    /// Make the allocation cursor at least `count`; used after recovery.
    pub fn ensure_page_count(&self, count: u64) {
        self.page_count.fetch_max(count, Ordering::AcqRel);
    }

    pub fn read_page(&self, page_id: PageId) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.page_size];
        let mut file = self.file.lock();
        let offset = page_id * self.page_size as u64;
        if offset >= file.metadata()?.len() {
            return Ok(buf);
        }
        file.seek(SeekFrom::Start(offset))?;
        // A short read at the tail still yields a full zero-padded page
        let mut read = 0;
        while read < self.page_size {
            let n = file.read(&mut buf[read..])?;
            if n == 0 {
                break;
            }
            read += n;
        }
        Ok(buf)
    }

    pub fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        debug_assert_eq!(data.len(), self.page_size);
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(page_id * self.page_size as u64))?;
        file.write_all(data).map_err(map_full)?;
        self.page_count.fetch_max(page_id + 1, Ordering::AcqRel);
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.file.lock().sync_data()?;
        Ok(())
    }
}

fn map_full(e: std::io::Error) -> StoreError {
    match e.kind() {
        std::io::ErrorKind::WriteZero | std::io::ErrorKind::OutOfMemory => StoreError::StorageFull,
        _ if e.raw_os_error() == Some(28) => StoreError::StorageFull, // ENOSPC
        _ => StoreError::Io(e),
    }
}
