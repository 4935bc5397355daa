use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

pub type PageId = u64;

/// Page 0 of `data.pages` holds the superblock.
pub const SUPERBLOCK_PAGE: PageId = 0;

/// Number of index orderings persisted in the superblock.
pub const INDEX_COUNT: usize = 6;

const MAGIC: u32 = 0x4351_4442; // "CQDB"
const VERSION: u32 = 1;

/// A fixed-size block of data
#[derive(Debug, Clone)]
pub struct Page {
    pub id: PageId,
    pub data: Vec<u8>,
    pub is_dirty: bool,
}

impl Page {
    pub fn new(id: PageId, size: usize) -> Self {
        Self {
            id,
            data: vec![0; size],
            is_dirty: false,
        }
    }

    pub fn from_bytes(id: PageId, data: Vec<u8>) -> Self {
        Self {
            id,
            data,
            is_dirty: false,
        }
    }

    pub fn mark_dirty(&mut self) {
        self.is_dirty = true;
    }
}

/// Root metadata stored on page 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Superblock {
    pub magic: u32,
    pub version: u32,
    pub page_size: u32,
    pub index_roots: [PageId; INDEX_COUNT],
    pub quad_count: u64,
}

impl Superblock {
    pub fn new(page_size: usize) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            page_size: page_size as u32,
            index_roots: [0; INDEX_COUNT],
            quad_count: 0,
        }
    }

    pub fn encode_into(&self, page: &mut [u8]) -> Result<()> {
        let bytes = bincode::serde::encode_to_vec(self, bincode::config::standard())?;
        if bytes.len() > page.len() {
            return Err(StoreError::Corruption("superblock exceeds page".to_string()));
        }
        page[..bytes.len()].copy_from_slice(&bytes);
        page[bytes.len()..].fill(0);
        Ok(())
    }

    pub fn decode_from(page: &[u8], expected_page_size: usize) -> Result<Self> {
        let (block, _): (Superblock, usize) =
            bincode::serde::decode_from_slice(page, bincode::config::standard())?;
        if block.magic != MAGIC {
            return Err(StoreError::Corruption("bad superblock magic".to_string()));
        }
        if block.version != VERSION {
            return Err(StoreError::Corruption(format!(
                "unsupported store version {}",
                block.version
            )));
        }
        if block.page_size as usize != expected_page_size {
            return Err(StoreError::Corruption(format!(
                "store page size {} does not match configured {}",
                block.page_size, expected_page_size
            )));
        }
        Ok(block)
    }
}
