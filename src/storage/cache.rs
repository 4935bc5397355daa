use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::storage::disk::DiskManager;
use crate::storage::page::{Page, PageId};
use crate::storage::wal::{WalFile, WalFrame};

pub type TxnId = u64;

/// Cache counters
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
}

struct ActiveTxn {
    id: TxnId,
    pre_images: Vec<(PageId, Vec<u8>)>,
    touched: HashSet<PageId>,
}

struct CacheInner {
    frames: HashMap<PageId, Arc<RwLock<Page>>>,
    lru: VecDeque<PageId>,
    active: Option<ActiveTxn>,
    /// Pages whose post-images are in the fsynced WAL but not yet flushed
    /// back to the data file.
    committed_dirty: HashSet<PageId>,
}

/// Buffer cache over the data file with WAL-backed write transactions.
///
/// Protocol: `begin_write` captures a pre-image once per page per
/// transaction; `commit_transaction` appends pre- and post-images plus a
/// commit frame and fsyncs the log before any page may reach the data
/// file. A single write transaction is active at a time.
pub struct PageCache {
    disk: Arc<DiskManager>,
    wal: Mutex<WalFile>,
    inner: Mutex<CacheInner>,
    capacity: usize,
    next_txn: AtomicU64,
    degraded: AtomicBool,
    stats: CacheStats,
}

impl PageCache {
    /// Open the cache, replaying any committed WAL transactions first.
    pub fn open(disk: Arc<DiskManager>, wal_path: &Path, capacity: usize) -> Result<Self> {
        let mut wal = WalFile::open(wal_path)?;
        Self::recover(&disk, &mut wal)?;

        Ok(Self {
            disk,
            wal: Mutex::new(wal),
            inner: Mutex::new(CacheInner {
                frames: HashMap::new(),
                lru: VecDeque::new(),
                active: None,
                committed_dirty: HashSet::new(),
            }),
            capacity: capacity.max(8),
            next_txn: AtomicU64::new(1),
            degraded: AtomicBool::new(false),
            stats: CacheStats::default(),
        })
    }

    /// Redo committed transactions from the log; incomplete ones are
    /// skipped because the data file is never mutated before the commit
    /// frame is durable.
    fn recover(disk: &DiskManager, wal: &mut WalFile) -> Result<()> {
        let (frames, valid_len) = wal.read_frames()?;
        if frames.is_empty() {
            wal.truncate_to(valid_len)?;
            return Ok(());
        }

        let mut pending: HashMap<TxnId, Vec<(PageId, Vec<u8>)>> = HashMap::new();
        let mut redone = 0usize;

        for frame in frames {
            match frame {
                WalFrame::BeginTxn { txn_id } => {
                    pending.insert(txn_id, Vec::new());
                }
                WalFrame::PagePreImage { .. } => {
                    // Redo-only recovery; pre-images matter only for
                    // in-memory aborts
                }
                WalFrame::PagePostImage {
                    txn_id,
                    page_id,
                    data,
                } => {
                    pending.entry(txn_id).or_default().push((page_id, data));
                }
                WalFrame::CommitTxn { txn_id } => {
                    if let Some(posts) = pending.remove(&txn_id) {
                        for (page_id, data) in posts {
                            disk.write_page(page_id, &data)?;
                        }
                        redone += 1;
                    }
                }
                WalFrame::Checkpoint => {
                    pending.clear();
                }
            }
        }

        if !pending.is_empty() {
            debug!(count = pending.len(), "skipping incomplete WAL transactions");
        }
        if redone > 0 {
            disk.sync()?;
            info!(transactions = redone, "WAL recovery complete");
        }
        wal.reset()?;
        Ok(())
    }

    pub fn disk(&self) -> &Arc<DiskManager> {
        &self.disk
    }

    pub fn page_size(&self) -> usize {
        self.disk.page_size()
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn allocate_page(&self) -> PageId {
        self.disk.allocate_page()
    }

    fn check_usable(&self) -> Result<()> {
        if self.degraded.load(Ordering::Acquire) {
            return Err(StoreError::StorageIo(
                "store is in degraded read-only state; reopen to recover".to_string(),
            ));
        }
        Ok(())
    }

    /// Fetch a page for reading. The returned handle stays valid even if
    /// the page is later evicted from the cache.
    pub fn read_page(&self, page_id: PageId) -> Result<Arc<RwLock<Page>>> {
        let mut inner = self.inner.lock();
        if let Some(frame) = inner.frames.get(&page_id) {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            let frame = frame.clone();
            Self::touch(&mut inner, page_id);
            return Ok(frame);
        }

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        let data = self.disk.read_page(page_id)?;
        let frame = Arc::new(RwLock::new(Page::from_bytes(page_id, data)));
        inner.frames.insert(page_id, frame.clone());
        inner.lru.push_back(page_id);
        self.evict_over_capacity(&mut inner);
        Ok(frame)
    }

    fn touch(inner: &mut CacheInner, page_id: PageId) {
        if let Some(pos) = inner.lru.iter().position(|&id| id == page_id) {
            inner.lru.remove(pos);
        }
        inner.lru.push_back(page_id);
    }

    fn evict_over_capacity(&self, inner: &mut CacheInner) {
        let mut scanned = 0;
        while inner.frames.len() > self.capacity && scanned < inner.lru.len() {
            let Some(candidate) = inner.lru.pop_front() else {
                break;
            };
            scanned += 1;
            let evictable = inner
                .frames
                .get(&candidate)
                .map(|frame| Arc::strong_count(frame) == 1 && !frame.read().is_dirty)
                .unwrap_or(false);
            if evictable {
                inner.frames.remove(&candidate);
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            } else {
                inner.lru.push_back(candidate);
            }
        }
        if inner.frames.len() > self.capacity * 2 {
            warn!(
                resident = inner.frames.len(),
                capacity = self.capacity,
                "page cache over capacity; dirty pages pinned until checkpoint"
            );
        }
    }

    /// Start a write transaction. The store's writer lock guarantees a
    /// single writer; a second concurrent transaction is a logic error.
    pub fn begin_txn(&self) -> Result<TxnId> {
        self.check_usable()?;
        let mut inner = self.inner.lock();
        if inner.active.is_some() {
            return Err(StoreError::Internal(
                "write transaction already active".to_string(),
            ));
        }
        let id = self.next_txn.fetch_add(1, Ordering::AcqRel);
        inner.active = Some(ActiveTxn {
            id,
            pre_images: Vec::new(),
            touched: HashSet::new(),
        });
        Ok(id)
    }

    /// Fetch a page for writing inside `txn`, capturing its pre-image on
    /// first touch.
    pub fn begin_write(&self, txn: TxnId, page_id: PageId) -> Result<Arc<RwLock<Page>>> {
        self.check_usable()?;
        let mut inner = self.inner.lock();

        let frame = match inner.frames.get(&page_id) {
            Some(frame) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                frame.clone()
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                let data = self.disk.read_page(page_id)?;
                let frame = Arc::new(RwLock::new(Page::from_bytes(page_id, data)));
                inner.frames.insert(page_id, frame.clone());
                inner.lru.push_back(page_id);
                frame
            }
        };
        Self::touch(&mut inner, page_id);

        let active = inner
            .active
            .as_mut()
            .ok_or_else(|| StoreError::Internal("no active write transaction".to_string()))?;
        if active.id != txn {
            return Err(StoreError::Internal(format!(
                "begin_write for txn {txn} but txn {} is active",
                active.id
            )));
        }
        if active.touched.insert(page_id) {
            active.pre_images.push((page_id, frame.read().data.clone()));
        }
        frame.write().mark_dirty();
        Ok(frame)
    }

    /// Append the transaction's images and commit frame, then fsync.
    /// Only after the fsync do the pages become flushable.
    pub fn commit_transaction(&self, txn: TxnId) -> Result<()> {
        self.check_usable()?;
        let mut inner = self.inner.lock();
        let active = match inner.active.take() {
            Some(active) if active.id == txn => active,
            Some(other) => {
                inner.active = Some(other);
                return Err(StoreError::Internal(format!(
                    "commit for txn {txn} but a different txn is active"
                )));
            }
            None => {
                return Err(StoreError::Internal(
                    "commit without active transaction".to_string(),
                ))
            }
        };

        let mut post_images = Vec::with_capacity(active.touched.len());
        for &page_id in &active.touched {
            let frame = inner
                .frames
                .get(&page_id)
                .ok_or_else(|| StoreError::Internal("touched page missing".to_string()))?;
            post_images.push((page_id, frame.read().data.clone()));
        }

        let mut wal = self.wal.lock();
        let write = (|| -> Result<()> {
            wal.append(&WalFrame::BeginTxn { txn_id: txn })?;
            for (page_id, data) in &active.pre_images {
                wal.append(&WalFrame::PagePreImage {
                    txn_id: txn,
                    page_id: *page_id,
                    data: data.clone(),
                })?;
            }
            for (page_id, data) in &post_images {
                wal.append(&WalFrame::PagePostImage {
                    txn_id: txn,
                    page_id: *page_id,
                    data: data.clone(),
                })?;
            }
            wal.append(&WalFrame::CommitTxn { txn_id: txn })?;
            wal.sync()
        })();

        if let Err(e) = write {
            self.degraded.store(true, Ordering::Release);
            return Err(StoreError::StorageIo(format!(
                "WAL commit failed; store degraded: {e}"
            )));
        }

        inner.committed_dirty.extend(active.touched);
        Ok(())
    }

    /// Roll the transaction back in memory from its pre-images.
    pub fn abort_transaction(&self, txn: TxnId) -> Result<()> {
        let mut inner = self.inner.lock();
        let active = match inner.active.take() {
            Some(active) if active.id == txn => active,
            Some(other) => {
                inner.active = Some(other);
                return Err(StoreError::Internal(format!(
                    "abort for txn {txn} but a different txn is active"
                )));
            }
            None => return Ok(()),
        };

        for (page_id, pre) in active.pre_images {
            let still_committed = inner.committed_dirty.contains(&page_id);
            if let Some(frame) = inner.frames.get(&page_id) {
                let mut page = frame.write();
                page.data = pre;
                page.is_dirty = still_committed;
            }
        }
        Ok(())
    }

    /// Flush committed pages to the data file, fsync it, and reset the log.
    pub fn checkpoint(&self) -> Result<()> {
        self.check_usable()?;
        let mut inner = self.inner.lock();
        if inner.active.is_some() {
            return Err(StoreError::Internal(
                "checkpoint with active write transaction".to_string(),
            ));
        }

        let flushable: Vec<PageId> = inner.committed_dirty.iter().copied().collect();
        for page_id in &flushable {
            if let Some(frame) = inner.frames.get(page_id) {
                let mut page = frame.write();
                self.disk.write_page(*page_id, &page.data)?;
                page.is_dirty = false;
            }
        }

        let result = (|| -> Result<()> {
            self.disk.sync()?;
            self.wal.lock().reset()
        })();
        if let Err(e) = result {
            self.degraded.store(true, Ordering::Release);
            return Err(StoreError::StorageIo(format!(
                "checkpoint fsync failed; store degraded: {e}"
            )));
        }

        inner.committed_dirty.clear();
        self.evict_over_capacity(&mut inner);
        debug!(pages = flushable.len(), "checkpoint flushed");
        Ok(())
    }
}
