// Page-backed B+tree over the buffer cache.
//
// Leaves hold sorted runs of fixed-width tuples and are linked in key
// order; interior nodes hold separator keys and child page ids. All
// mutations run inside a cache write transaction so every structural
// change is WAL-protected.

use std::sync::Arc;

use crate::error::{Result, StoreError};
use crate::index::tuple::{IndexTuple, TUPLE_BYTES};
use crate::storage::{PageCache, PageId, TxnId};

const HDR: usize = 16;
const LEAF: u8 = 1;
const INTERIOR: u8 = 2;
const INTERIOR_ENTRY: usize = TUPLE_BYTES + 8;

/// Tuples examined before `range_count_estimate` extrapolates.
const ESTIMATE_SCAN_LIMIT: u64 = 1024;

fn node_type(data: &[u8]) -> u8 {
    data[0]
}

fn node_count(data: &[u8]) -> usize {
    u16::from_le_bytes([data[2], data[3]]) as usize
}

fn node_link(data: &[u8]) -> u64 {
    u64::from_le_bytes(data[8..16].try_into().unwrap())
}

fn leaf_tuple(data: &[u8], i: usize) -> IndexTuple {
    IndexTuple::decode(&data[HDR + i * TUPLE_BYTES..])
}

fn read_leaf(data: &[u8]) -> (Vec<IndexTuple>, u64) {
    let n = node_count(data);
    let entries = (0..n).map(|i| leaf_tuple(data, i)).collect();
    (entries, node_link(data))
}

fn write_leaf(data: &mut [u8], entries: &[IndexTuple], next: u64) {
    data[0] = LEAF;
    data[1] = 0;
    data[2..4].copy_from_slice(&(entries.len() as u16).to_le_bytes());
    data[4..8].fill(0);
    data[8..16].copy_from_slice(&next.to_le_bytes());
    for (i, t) in entries.iter().enumerate() {
        t.encode_into(&mut data[HDR + i * TUPLE_BYTES..HDR + (i + 1) * TUPLE_BYTES]);
    }
}

fn read_interior(data: &[u8]) -> (Vec<(IndexTuple, PageId)>, PageId) {
    let n = node_count(data);
    let entries = (0..n)
        .map(|i| {
            let base = HDR + i * INTERIOR_ENTRY;
            let key = IndexTuple::decode(&data[base..]);
            let child =
                u64::from_le_bytes(data[base + TUPLE_BYTES..base + INTERIOR_ENTRY].try_into().unwrap());
            (key, child)
        })
        .collect();
    (entries, node_link(data))
}

fn write_interior(data: &mut [u8], entries: &[(IndexTuple, PageId)], rightmost: PageId) {
    data[0] = INTERIOR;
    data[1] = 0;
    data[2..4].copy_from_slice(&(entries.len() as u16).to_le_bytes());
    data[4..8].fill(0);
    data[8..16].copy_from_slice(&rightmost.to_le_bytes());
    for (i, (key, child)) in entries.iter().enumerate() {
        let base = HDR + i * INTERIOR_ENTRY;
        key.encode_into(&mut data[base..base + TUPLE_BYTES]);
        data[base + TUPLE_BYTES..base + INTERIOR_ENTRY].copy_from_slice(&child.to_le_bytes());
    }
}

/// Child slot for `target`: the first entry whose key exceeds it, or the
/// rightmost child. Slot `entries.len()` addresses the rightmost.
fn find_child(entries: &[(IndexTuple, PageId)], rightmost: PageId, target: &IndexTuple) -> (usize, PageId) {
    for (i, (key, child)) in entries.iter().enumerate() {
        if target < key {
            return (i, *child);
        }
    }
    (entries.len(), rightmost)
}

/// Tree shape statistics
#[derive(Debug, Clone, Default)]
pub struct BTreeStats {
    pub height: usize,
    pub leaf_pages: usize,
    pub interior_pages: usize,
    pub entries: u64,
}

/// One ordering's B+tree.
pub struct BTree {
    cache: Arc<PageCache>,
    root: PageId,
    leaf_cap: usize,
    int_cap: usize,
}

impl BTree {
    /// Allocate an empty root leaf inside `txn`.
    pub fn create(cache: Arc<PageCache>, txn: TxnId) -> Result<Self> {
        let root = cache.allocate_page();
        let frame = cache.begin_write(txn, root)?;
        write_leaf(&mut frame.write().data, &[], 0);
        Ok(Self::open(cache, root))
    }

    pub fn open(cache: Arc<PageCache>, root: PageId) -> Self {
        let page_size = cache.page_size();
        Self {
            cache,
            root,
            leaf_cap: (page_size - HDR) / TUPLE_BYTES,
            int_cap: (page_size - HDR) / INTERIOR_ENTRY,
        }
    }

    pub fn root(&self) -> PageId {
        self.root
    }

    fn descend(&self, target: &IndexTuple) -> Result<(PageId, Vec<(PageId, usize)>)> {
        let mut path = Vec::new();
        let mut cur = self.root;
        loop {
            let frame = self.cache.read_page(cur)?;
            let page = frame.read();
            if node_type(&page.data) == LEAF {
                return Ok((cur, path));
            }
            let (entries, rightmost) = read_interior(&page.data);
            let (slot, child) = find_child(&entries, rightmost, target);
            if child == 0 {
                return Err(StoreError::Corruption(format!(
                    "interior page {cur} has null child"
                )));
            }
            path.push((cur, slot));
            cur = child;
        }
    }

    /// Insert `tuple`; returns false if the exact tuple is already present.
    pub fn insert(&mut self, txn: TxnId, tuple: IndexTuple) -> Result<bool> {
        let (leaf_id, path) = self.descend(&tuple)?;

        let frame = self.cache.begin_write(txn, leaf_id)?;
        let (mut entries, next) = read_leaf(&frame.read().data);
        match entries.binary_search(&tuple) {
            Ok(_) => return Ok(false),
            Err(pos) => entries.insert(pos, tuple),
        }

        if entries.len() <= self.leaf_cap {
            write_leaf(&mut frame.write().data, &entries, next);
            return Ok(true);
        }

        // Split the leaf; the separator is the first key of the new right
        // sibling.
        let mid = entries.len() / 2;
        let right_entries = entries.split_off(mid);
        let sep = right_entries[0];
        let right_id = self.cache.allocate_page();
        let right_frame = self.cache.begin_write(txn, right_id)?;
        write_leaf(&mut right_frame.write().data, &right_entries, next);
        write_leaf(&mut frame.write().data, &entries, right_id);

        self.propagate_split(txn, path, leaf_id, sep, right_id)?;
        Ok(true)
    }

    fn propagate_split(
        &mut self,
        txn: TxnId,
        mut path: Vec<(PageId, usize)>,
        mut split_left: PageId,
        mut sep: IndexTuple,
        mut new_child: PageId,
    ) -> Result<()> {
        loop {
            let Some((pid, slot)) = path.pop() else {
                // Root split: grow the tree by one level
                let new_root = self.cache.allocate_page();
                let frame = self.cache.begin_write(txn, new_root)?;
                write_interior(&mut frame.write().data, &[(sep, split_left)], new_child);
                self.root = new_root;
                return Ok(());
            };

            let frame = self.cache.begin_write(txn, pid)?;
            let (mut entries, mut rightmost) = read_interior(&frame.read().data);

            // The child at `slot` split: its left half keeps the page id,
            // the slot itself must now address the right half.
            entries.insert(slot, (sep, split_left));
            if slot + 1 < entries.len() {
                entries[slot + 1].1 = new_child;
            } else {
                rightmost = new_child;
            }

            if entries.len() <= self.int_cap {
                write_interior(&mut frame.write().data, &entries, rightmost);
                return Ok(());
            }

            let mid = entries.len() / 2;
            let up_key = entries[mid].0;
            let left_rightmost = entries[mid].1;
            let right_entries: Vec<_> = entries.split_off(mid + 1);
            entries.pop(); // the median moves up

            let right_id = self.cache.allocate_page();
            let right_frame = self.cache.begin_write(txn, right_id)?;
            write_interior(&mut right_frame.write().data, &right_entries, rightmost);
            write_interior(&mut frame.write().data, &entries, left_rightmost);

            split_left = pid;
            sep = up_key;
            new_child = right_id;
        }
    }

    /// Remove the exact tuple; returns false if absent.
    pub fn remove(&mut self, txn: TxnId, tuple: &IndexTuple) -> Result<bool> {
        let (leaf_id, path) = self.descend(tuple)?;

        let frame = self.cache.begin_write(txn, leaf_id)?;
        let (mut entries, next) = read_leaf(&frame.read().data);
        let Ok(pos) = entries.binary_search(tuple) else {
            return Ok(false);
        };
        entries.remove(pos);
        write_leaf(&mut frame.write().data, &entries, next);

        self.fix_underflow(txn, leaf_id, path)?;
        Ok(true)
    }

    fn fix_underflow(
        &mut self,
        txn: TxnId,
        mut cur: PageId,
        mut path: Vec<(PageId, usize)>,
    ) -> Result<()> {
        loop {
            let frame = self.cache.read_page(cur)?;
            let (is_leaf, n) = {
                let page = frame.read();
                (node_type(&page.data) == LEAF, node_count(&page.data))
            };

            if cur == self.root {
                if !is_leaf && n == 0 {
                    // Collapse an empty interior root onto its only child
                    let page = frame.read();
                    self.root = node_link(&page.data);
                }
                return Ok(());
            }

            let min = if is_leaf {
                self.leaf_cap / 2
            } else {
                self.int_cap / 2
            };
            if n >= min {
                return Ok(());
            }

            let (parent_id, slot) = path
                .pop()
                .ok_or_else(|| StoreError::Corruption("orphan page in B+tree".to_string()))?;
            let parent_frame = self.cache.begin_write(txn, parent_id)?;
            let (mut pentries, mut prightmost) = read_interior(&parent_frame.read().data);
            let child_at = |entries: &[(IndexTuple, PageId)], rightmost: PageId, i: usize| {
                if i < entries.len() {
                    entries[i].1
                } else {
                    rightmost
                }
            };

            // Borrow from a sibling that can spare an entry
            if slot > 0 {
                let left_id = child_at(&pentries, prightmost, slot - 1);
                if self.try_borrow_from_left(txn, cur, left_id, &mut pentries, slot, min, is_leaf)? {
                    write_interior(&mut parent_frame.write().data, &pentries, prightmost);
                    return Ok(());
                }
            }
            if slot < pentries.len() {
                let right_id = child_at(&pentries, prightmost, slot + 1);
                if self.try_borrow_from_right(txn, cur, right_id, &mut pentries, slot, min, is_leaf)? {
                    write_interior(&mut parent_frame.write().data, &pentries, prightmost);
                    return Ok(());
                }
            }

            // Merge with a sibling and drop one separator from the parent
            if slot > 0 {
                let left_id = child_at(&pentries, prightmost, slot - 1);
                self.merge_nodes(txn, left_id, cur, pentries[slot - 1].0, is_leaf)?;
                if slot < pentries.len() {
                    pentries[slot].1 = left_id;
                } else {
                    prightmost = left_id;
                }
                pentries.remove(slot - 1);
            } else {
                let right_id = child_at(&pentries, prightmost, 1);
                self.merge_nodes(txn, cur, right_id, pentries[0].0, is_leaf)?;
                if 1 < pentries.len() {
                    pentries[1].1 = cur;
                } else {
                    prightmost = cur;
                }
                pentries.remove(0);
            }
            write_interior(&mut parent_frame.write().data, &pentries, prightmost);
            cur = parent_id;
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn try_borrow_from_left(
        &self,
        txn: TxnId,
        cur: PageId,
        left_id: PageId,
        pentries: &mut [(IndexTuple, PageId)],
        slot: usize,
        min: usize,
        is_leaf: bool,
    ) -> Result<bool> {
        let left_frame = self.cache.read_page(left_id)?;
        if node_count(&left_frame.read().data) <= min {
            return Ok(false);
        }
        let left_frame = self.cache.begin_write(txn, left_id)?;
        let cur_frame = self.cache.begin_write(txn, cur)?;

        if is_leaf {
            let (mut left, left_next) = read_leaf(&left_frame.read().data);
            let (mut entries, next) = read_leaf(&cur_frame.read().data);
            let moved = left.pop().expect("left sibling is non-empty");
            entries.insert(0, moved);
            pentries[slot - 1].0 = moved;
            write_leaf(&mut left_frame.write().data, &left, left_next);
            write_leaf(&mut cur_frame.write().data, &entries, next);
        } else {
            let (mut left, left_rightmost) = read_interior(&left_frame.read().data);
            let (mut entries, rightmost) = read_interior(&cur_frame.read().data);
            let sep = pentries[slot - 1].0;
            entries.insert(0, (sep, left_rightmost));
            let (new_sep, new_left_rightmost) = left.pop().expect("left sibling is non-empty");
            pentries[slot - 1].0 = new_sep;
            write_interior(&mut left_frame.write().data, &left, new_left_rightmost);
            write_interior(&mut cur_frame.write().data, &entries, rightmost);
        }
        Ok(true)
    }

    #[allow(clippy::too_many_arguments)]
    fn try_borrow_from_right(
        &self,
        txn: TxnId,
        cur: PageId,
        right_id: PageId,
        pentries: &mut [(IndexTuple, PageId)],
        slot: usize,
        min: usize,
        is_leaf: bool,
    ) -> Result<bool> {
        let right_frame = self.cache.read_page(right_id)?;
        if node_count(&right_frame.read().data) <= min {
            return Ok(false);
        }
        let right_frame = self.cache.begin_write(txn, right_id)?;
        let cur_frame = self.cache.begin_write(txn, cur)?;

        if is_leaf {
            let (mut right, right_next) = read_leaf(&right_frame.read().data);
            let (mut entries, next) = read_leaf(&cur_frame.read().data);
            let moved = right.remove(0);
            entries.push(moved);
            pentries[slot].0 = right[0];
            write_leaf(&mut right_frame.write().data, &right, right_next);
            write_leaf(&mut cur_frame.write().data, &entries, next);
        } else {
            let (mut right, right_rightmost) = read_interior(&right_frame.read().data);
            let (mut entries, mut rightmost) = read_interior(&cur_frame.read().data);
            let sep = pentries[slot].0;
            let (rk, rc) = right.remove(0);
            entries.push((sep, rightmost));
            rightmost = rc;
            pentries[slot].0 = rk;
            write_interior(&mut right_frame.write().data, &right, right_rightmost);
            write_interior(&mut cur_frame.write().data, &entries, rightmost);
        }
        Ok(true)
    }

    /// Merge `right_id` into `left_id` around `sep`; the right page is
    /// abandoned (reclaimed only by offline compaction).
    fn merge_nodes(
        &self,
        txn: TxnId,
        left_id: PageId,
        right_id: PageId,
        sep: IndexTuple,
        is_leaf: bool,
    ) -> Result<()> {
        let left_frame = self.cache.begin_write(txn, left_id)?;
        let right_frame = self.cache.read_page(right_id)?;

        if is_leaf {
            let (mut left, _) = read_leaf(&left_frame.read().data);
            let (right, right_next) = read_leaf(&right_frame.read().data);
            left.extend(right);
            write_leaf(&mut left_frame.write().data, &left, right_next);
        } else {
            let (mut left, left_rightmost) = read_interior(&left_frame.read().data);
            let (right, right_rightmost) = read_interior(&right_frame.read().data);
            left.push((sep, left_rightmost));
            left.extend(right);
            write_interior(&mut left_frame.write().data, &left, right_rightmost);
        }
        Ok(())
    }

    /// Position a cursor at the first tuple whose leading key columns
    /// match `prefix` (or at the next greater tuple).
    pub fn seek(&self, prefix: &[u64]) -> Result<BTreeCursor> {
        debug_assert!(prefix.len() <= 4);
        let mut target = IndexTuple::new([0; 4], 0, u64::MAX);
        target.key[..prefix.len()].copy_from_slice(prefix);

        let (leaf_id, _) = self.descend(&target)?;
        let frame = self.cache.read_page(leaf_id)?;
        let page = frame.read();
        let (entries, next) = read_leaf(&page.data);
        let pos = entries.partition_point(|e| e < &target);

        if pos == entries.len() {
            Ok(BTreeCursor {
                cache: self.cache.clone(),
                page: next,
                idx: 0,
            })
        } else {
            Ok(BTreeCursor {
                cache: self.cache.clone(),
                page: leaf_id,
                idx: pos,
            })
        }
    }

    pub fn scan_all(&self) -> Result<BTreeCursor> {
        self.seek(&[])
    }

    /// Sampled cardinality for the planner: exact for small ranges, a
    /// coarse extrapolation once the scan limit is hit.
    pub fn range_count_estimate(&self, prefix: &[u64]) -> Result<u64> {
        let mut cursor = self.seek(prefix)?;
        let mut matched = 0u64;
        while let Some(tuple) = cursor.next()? {
            if !tuple.matches_prefix(prefix) {
                return Ok(matched);
            }
            matched += 1;
            if matched >= ESTIMATE_SCAN_LIMIT {
                return Ok(matched * 4);
            }
        }
        Ok(matched)
    }

    /// Build the tree bottom-up from sorted, deduplicated tuples. Only
    /// valid on an empty tree.
    pub fn bulk_load(&mut self, txn: TxnId, tuples: &[IndexTuple]) -> Result<()> {
        if tuples.is_empty() {
            return Ok(());
        }
        debug_assert!(tuples.windows(2).all(|w| w[0] < w[1]));

        // Leaf level
        let mut level: Vec<(IndexTuple, PageId)> = Vec::new();
        let mut leaf_ids: Vec<PageId> = Vec::new();
        for chunk in tuples.chunks(self.leaf_cap) {
            let id = self.cache.allocate_page();
            leaf_ids.push(id);
            level.push((chunk[0], id));
        }
        for (i, chunk) in tuples.chunks(self.leaf_cap).enumerate() {
            let next = leaf_ids.get(i + 1).copied().unwrap_or(0);
            let frame = self.cache.begin_write(txn, leaf_ids[i])?;
            write_leaf(&mut frame.write().data, chunk, next);
        }

        // Interior levels
        while level.len() > 1 {
            let mut parents = Vec::new();
            for group in level.chunks(self.int_cap + 1) {
                let id = self.cache.allocate_page();
                let entries: Vec<(IndexTuple, PageId)> = group
                    .windows(2)
                    .map(|w| (w[1].0, w[0].1))
                    .collect();
                let rightmost = group.last().expect("group is non-empty").1;
                let frame = self.cache.begin_write(txn, id)?;
                write_interior(&mut frame.write().data, &entries, rightmost);
                parents.push((group[0].0, id));
            }
            level = parents;
        }

        self.root = level[0].1;
        Ok(())
    }

    pub fn stats(&self) -> Result<BTreeStats> {
        let mut stats = BTreeStats::default();
        self.collect_stats(self.root, 1, &mut stats)?;
        Ok(stats)
    }

    fn collect_stats(&self, page_id: PageId, depth: usize, stats: &mut BTreeStats) -> Result<()> {
        let frame = self.cache.read_page(page_id)?;
        let page = frame.read();
        stats.height = stats.height.max(depth);
        if node_type(&page.data) == LEAF {
            stats.leaf_pages += 1;
            stats.entries += node_count(&page.data) as u64;
        } else {
            stats.interior_pages += 1;
            let (entries, rightmost) = read_interior(&page.data);
            drop(page);
            for (_, child) in &entries {
                self.collect_stats(*child, depth + 1, stats)?;
            }
            self.collect_stats(rightmost, depth + 1, stats)?;
        }
        Ok(())
    }
}

/// Forward scan over the leaf chain.
pub struct BTreeCursor {
    cache: Arc<PageCache>,
    page: PageId,
    idx: usize,
}

impl BTreeCursor {
    pub fn next(&mut self) -> Result<Option<IndexTuple>> {
        loop {
            if self.page == 0 {
                return Ok(None);
            }
            let frame = self.cache.read_page(self.page)?;
            let page = frame.read();
            if self.idx < node_count(&page.data) {
                let tuple = leaf_tuple(&page.data, self.idx);
                self.idx += 1;
                return Ok(Some(tuple));
            }
            self.page = node_link(&page.data);
            self.idx = 0;
        }
    }
}
