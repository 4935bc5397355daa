// # Quad Store
//
// Bitemporal assert/retract/query over the six B+tree orderings, with
// batch write transactions and the reader/writer lease protocol.

pub mod quad;

pub use quad::{Interval, Moment, Quad, TemporalScope, TriplePosition, FOREVER};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use crate::atoms::{AtomDictionary, AtomId, Term};
use crate::common::CancelToken;
use crate::error::{Result, StoreError};
use crate::index::{BTree, BTreeCursor, IndexOrder, IndexTuple};
use crate::parser::{self, NQuadsWriter, RdfFormat};
use crate::storage::{DiskManager, PageCache, Superblock, TxnId, SUPERBLOCK_PAGE};
use crate::Config;

/// A pattern over the four quad positions; `None` is a wildcard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuadPattern {
    pub subject: Option<AtomId>,
    pub predicate: Option<AtomId>,
    pub object: Option<AtomId>,
    pub graph: Option<AtomId>,
}

impl QuadPattern {
    pub fn any() -> Self {
        Self::default()
    }

    fn bound_mask(&self) -> [bool; 4] {
        [
            self.subject.is_some(),
            self.predicate.is_some(),
            self.object.is_some(),
            self.graph.is_some(),
        ]
    }
}

/// Store-level counters
#[derive(Debug, Clone)]
pub struct StoreStats {
    pub quads: u64,
    pub atoms: usize,
    pub pages: u64,
}

struct StoreState {
    trees: Vec<BTree>,
    quad_count: u64,
    /// Graphs that have ever held a quad; stale entries are harmless
    /// because patterns still have to match.
    named_graphs: BTreeSet<AtomId>,
}

/// An embeddable bitemporal quad store over one directory
/// (`data.pages`, `wal.log`, `atoms.strings`).
pub struct QuadStore {
    atoms: Arc<AtomDictionary>,
    cache: Arc<PageCache>,
    state: RwLock<StoreState>,
    clock: AtomicU64,
    disposed: AtomicBool,
    budget: usize,
}

fn system_moment() -> Moment {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(1)
        .max(1)
}

impl QuadStore {
    /// Open or create the store directory described by `config`.
    pub fn open(config: &Config) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let atoms = Arc::new(AtomDictionary::open(&config.data_dir.join("atoms.strings"))?);
        let disk = Arc::new(DiskManager::open(
            &config.data_dir.join("data.pages"),
            config.page_size,
        )?);
        let cache = Arc::new(PageCache::open(
            disk,
            &config.data_dir.join("wal.log"),
            config.cache_capacity,
        )?);

        let state = if cache.disk().page_count() == 0 {
            // Fresh store: lay down the superblock and six empty roots
            let txn = cache.begin_txn()?;
            let sb_page = cache.allocate_page();
            debug_assert_eq!(sb_page, SUPERBLOCK_PAGE);

            let mut trees = Vec::with_capacity(6);
            for _ in IndexOrder::ALL {
                trees.push(BTree::create(cache.clone(), txn)?);
            }
            let mut sb = Superblock::new(config.page_size);
            for (i, tree) in trees.iter().enumerate() {
                sb.index_roots[i] = tree.root();
            }
            let frame = cache.begin_write(txn, SUPERBLOCK_PAGE)?;
            sb.encode_into(&mut frame.write().data)?;
            drop(frame);
            cache.commit_transaction(txn)?;
            debug!(dir = %config.data_dir.display(), "created fresh store");

            StoreState {
                trees,
                quad_count: 0,
                named_graphs: BTreeSet::new(),
            }
        } else {
            let frame = cache.read_page(SUPERBLOCK_PAGE)?;
            let sb = Superblock::decode_from(&frame.read().data, config.page_size)?;
            let trees: Vec<BTree> = sb
                .index_roots
                .iter()
                .map(|&root| BTree::open(cache.clone(), root))
                .collect();

            // Rebuild the named-graph set from the SPOG leaf chain
            let mut named_graphs = BTreeSet::new();
            let mut cursor = trees[IndexOrder::Spog as usize].scan_all()?;
            while let Some(tuple) = cursor.next()? {
                let g = AtomId(tuple.key[3]);
                if g != AtomId::DEFAULT_GRAPH {
                    named_graphs.insert(g);
                }
            }

            StoreState {
                trees,
                quad_count: sb.quad_count,
                named_graphs,
            }
        };

        Ok(Self {
            atoms,
            cache,
            state: RwLock::new(state),
            clock: AtomicU64::new(system_moment()),
            disposed: AtomicBool::new(false),
            budget: config.materialization_budget,
        })
    }

    /// Row count the executor may hash-materialize for a join build side.
    pub fn materialization_budget(&self) -> usize {
        self.budget
    }

    /// Open with default configuration rooted at `dir`.
    pub fn open_dir(dir: impl AsRef<Path>) -> Result<Self> {
        Self::open(&Config::new(dir.as_ref()))
    }

    fn check_open(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(StoreError::Disposed);
        }
        Ok(())
    }

    pub fn atoms(&self) -> &Arc<AtomDictionary> {
        &self.atoms
    }

    /// Strictly monotonic store moment.
    pub fn now(&self) -> Moment {
        let mut last = self.clock.load(Ordering::Acquire);
        loop {
            let next = system_moment().max(last + 1);
            match self
                .clock
                .compare_exchange(last, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return next,
                Err(cur) => last = cur,
            }
        }
    }

    /// Reader participation in the concurrency protocol. The lease holds
    /// the shared lock; dropping it releases.
    pub fn acquire_read_lock(&self) -> ReadLease<'_> {
        ReadLease {
            _guard: self.state.read_recursive(),
        }
    }

    /// Start a write transaction. Blocks until in-flight readers release.
    pub fn begin_batch(&self) -> Result<WriteBatch<'_>> {
        self.check_open()?;
        let guard = self.state.write();
        let txn = self.cache.begin_txn()?;
        Ok(WriteBatch {
            store: self,
            guard,
            txn,
            committed: false,
        })
    }

    /// Assert a single quad valid from now on, in its own transaction.
    pub fn assert_current(
        &self,
        subject: &Term,
        predicate: &Term,
        object: &Term,
        graph: Option<&Term>,
    ) -> Result<()> {
        let mut batch = self.begin_batch()?;
        let from = self.now();
        batch.assert_terms(subject, predicate, object, graph, Interval::open_from(from))?;
        batch.commit()
    }

    /// Close the open-ended matching quad as of now, in its own
    /// transaction. Returns false if no open quad matched.
    pub fn retract_current(
        &self,
        subject: &Term,
        predicate: &Term,
        object: &Term,
        graph: Option<&Term>,
    ) -> Result<bool> {
        let mut batch = self.begin_batch()?;
        let retracted = batch.retract_current_terms(subject, predicate, object, graph)?;
        batch.commit()?;
        Ok(retracted)
    }

    /// Match quads against `pattern` within `scope`. The cursor holds a
    /// read lease until dropped.
    pub fn query(&self, pattern: QuadPattern, scope: TemporalScope) -> Result<QuadCursor<'_>> {
        self.check_open()?;
        let guard = self.state.read_recursive();

        let order = choose_index(pattern.bound_mask());
        let prefix = order.seek_prefix(
            pattern.subject.map(|a| a.0),
            pattern.predicate.map(|a| a.0),
            pattern.object.map(|a| a.0),
            pattern.graph.map(|a| a.0),
        );
        let cursor = guard.trees[order as usize].seek(&prefix)?;
        let scope = scope.resolve(self.now());

        Ok(QuadCursor {
            _lease: guard,
            inner: Some(cursor),
            order,
            prefix,
            pattern,
            scope,
        })
    }

    /// Pattern match with `Term` constants; a constant unknown to the
    /// dictionary yields an empty cursor.
    pub fn query_terms(
        &self,
        subject: Option<&Term>,
        predicate: Option<&Term>,
        object: Option<&Term>,
        graph: Option<&Term>,
        scope: TemporalScope,
    ) -> Result<QuadCursor<'_>> {
        let resolve = |term: Option<&Term>| match term {
            None => Some(None),
            Some(term) => self.atoms.get(&term.canonical()).map(Some),
        };
        let resolved = (
            resolve(subject),
            resolve(predicate),
            resolve(object),
            resolve(graph),
        );
        let (Some(s), Some(p), Some(o), Some(g)) = resolved else {
            return Ok(QuadCursor {
                _lease: self.state.read_recursive(),
                inner: None,
                order: IndexOrder::Spog,
                prefix: Vec::new(),
                pattern: QuadPattern::any(),
                scope,
            });
        };
        self.query(
            QuadPattern {
                subject: s,
                predicate: p,
                object: o,
                graph: g,
            },
            scope,
        )
    }

    pub fn query_as_of(&self, pattern: QuadPattern, t: Moment) -> Result<QuadCursor<'_>> {
        self.query(pattern, TemporalScope::AsOf(t))
    }

    pub fn query_between(&self, pattern: QuadPattern, t1: Moment, t2: Moment) -> Result<QuadCursor<'_>> {
        self.query(pattern, TemporalScope::Between(t1, t2))
    }

    pub fn contains_current(&self, pattern: QuadPattern) -> Result<bool> {
        let mut cursor = self.query(pattern, TemporalScope::Now)?;
        Ok(cursor.next()?.is_some())
    }

    /// Sampled cardinality of a pattern, for the planner.
    pub fn estimate(&self, pattern: QuadPattern) -> Result<u64> {
        self.check_open()?;
        let guard = self.state.read_recursive();
        let order = choose_index(pattern.bound_mask());
        let prefix = order.seek_prefix(
            pattern.subject.map(|a| a.0),
            pattern.predicate.map(|a| a.0),
            pattern.object.map(|a| a.0),
            pattern.graph.map(|a| a.0),
        );
        guard.trees[order as usize].range_count_estimate(&prefix)
    }

    /// Named graphs observed by the store (never includes the default
    /// graph).
    pub fn named_graphs(&self) -> Vec<AtomId> {
        self.state.read_recursive().named_graphs.iter().copied().collect()
    }

    pub fn stats(&self) -> StoreStats {
        let state = self.state.read_recursive();
        StoreStats {
            quads: state.quad_count,
            atoms: self.atoms.len(),
            pages: self.cache.disk().page_count(),
        }
    }

    /// Flush committed pages, fsync, and truncate the WAL.
    pub fn checkpoint(&self) -> Result<()> {
        self.check_open()?;
        let _guard = self.state.write();
        self.atoms.sync()?;
        self.cache.checkpoint()
    }

    /// Parse RDF text and assert every emitted quad as currently valid,
    /// in one transaction. `graph` overrides the parser-provided graph.
    pub fn load(
        &self,
        data: impl std::io::Read,
        format: RdfFormat,
        base: Option<&str>,
        graph: Option<&Term>,
        cancel: &CancelToken,
    ) -> Result<u64> {
        self.check_open()?;
        let graph_canonical = graph.map(|g| g.canonical());
        let mut batch = self.begin_batch()?;
        let from = self.now();
        let mut count = 0u64;

        {
            let mut sink = |s: &str, p: &str, o: &str, g: &str| -> Result<()> {
                let g = graph_canonical.as_deref().unwrap_or(g);
                batch.assert_canonical(s, p, o, g, Interval::open_from(from))?;
                count += 1;
                Ok(())
            };
            parser::parse_quads(data, format, base, &mut sink, cancel)?;
        }

        batch.commit()?;
        Ok(count)
    }

    /// Write every currently valid quad as canonical N-Quads.
    pub fn dump<W: Write>(&self, out: &mut W) -> Result<u64> {
        let mut writer = NQuadsWriter::new(out);
        let mut cursor = self.query(QuadPattern::any(), TemporalScope::Now)?;
        let mut count = 0u64;
        while let Some(quad) = cursor.next()? {
            let s = self.atoms.lookup(quad.subject);
            let p = self.atoms.lookup(quad.predicate);
            let o = self.atoms.lookup(quad.object);
            let g = self.atoms.lookup(quad.graph);
            match (s, p, o, g) {
                (Some(s), Some(p), Some(o), Some(g)) => {
                    writer.write_quad(&s, &p, &o, &g)?;
                    count += 1;
                }
                _ => {
                    return Err(StoreError::Corruption(
                        "quad references unknown atom".to_string(),
                    ))
                }
            }
        }
        Ok(count)
    }

    /// Mark the store unusable and flush what is committed.
    pub fn dispose(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let _guard = self.state.write();
        self.atoms.sync()?;
        self.cache.checkpoint()
    }

    fn rollback(&self, guard: &mut RwLockWriteGuard<'_, StoreState>, txn: TxnId) -> Result<()> {
        self.cache.abort_transaction(txn)?;
        // Page pre-images are restored; re-derive the in-memory roots
        let frame = self.cache.read_page(SUPERBLOCK_PAGE)?;
        let sb = Superblock::decode_from(&frame.read().data, self.cache.page_size())?;
        guard.trees = sb
            .index_roots
            .iter()
            .map(|&root| BTree::open(self.cache.clone(), root))
            .collect();
        guard.quad_count = sb.quad_count;
        Ok(())
    }
}

impl Drop for QuadStore {
    fn drop(&mut self) {
        if !self.disposed.load(Ordering::Acquire) {
            self.atoms.sync().ok();
            if let Err(e) = self.cache.checkpoint() {
                warn!(error = %e, "checkpoint on close failed; WAL will replay on reopen");
            }
        }
    }
}

/// Scoped shared lock over the store state.
pub struct ReadLease<'a> {
    _guard: RwLockReadGuard<'a, StoreState>,
}

/// Pick the ordering with the longest bound prefix. Orders covering the
/// same bound column set see identical cardinalities, so the fixed
/// preference sequence settles ties.
fn choose_index(bound: [bool; 4]) -> IndexOrder {
    let mut best = IndexOrder::Spog;
    let mut best_len = IndexOrder::Spog.bound_prefix_len(bound);
    for order in IndexOrder::ALL {
        let len = order.bound_prefix_len(bound);
        if len > best_len {
            best = order;
            best_len = len;
        }
    }
    best
}

/// Streaming match over one index; filters residual bound positions and
/// the temporal scope.
pub struct QuadCursor<'a> {
    _lease: RwLockReadGuard<'a, StoreState>,
    inner: Option<BTreeCursor>,
    order: IndexOrder,
    prefix: Vec<u64>,
    pattern: QuadPattern,
    scope: TemporalScope,
}

impl QuadCursor<'_> {
    pub fn next(&mut self) -> Result<Option<Quad>> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(None);
        };
        while let Some(tuple) = inner.next()? {
            if !tuple.matches_prefix(&self.prefix) {
                return Ok(None);
            }
            let (s, p, o, g) = self.order.from_key(tuple.key);
            if self.pattern.subject.is_some_and(|a| a.0 != s)
                || self.pattern.predicate.is_some_and(|a| a.0 != p)
                || self.pattern.object.is_some_and(|a| a.0 != o)
                || self.pattern.graph.is_some_and(|a| a.0 != g)
            {
                continue;
            }
            let interval = Interval {
                from: tuple.valid_from,
                to: tuple.valid_to,
            };
            if !self.scope.admits(&interval) {
                continue;
            }
            return Ok(Some(Quad {
                subject: AtomId(s),
                predicate: AtomId(p),
                object: AtomId(o),
                graph: AtomId(g),
                interval,
            }));
        }
        Ok(None)
    }

    pub fn collect_all(&mut self) -> Result<Vec<Quad>> {
        let mut out = Vec::new();
        while let Some(quad) = self.next()? {
            out.push(quad);
        }
        Ok(out)
    }
}

/// A write transaction. Mutations are visible to queries only after
/// `commit`; dropping without commit rolls everything back.
pub struct WriteBatch<'a> {
    store: &'a QuadStore,
    guard: RwLockWriteGuard<'a, StoreState>,
    txn: TxnId,
    committed: bool,
}

impl WriteBatch<'_> {
    pub fn txn_id(&self) -> TxnId {
        self.txn
    }

    /// Current moment from the owning store's clock.
    pub fn now(&self) -> Moment {
        self.store.now()
    }

    /// Intern canonical term strings and assert.
    pub fn assert_canonical(
        &mut self,
        subject: &str,
        predicate: &str,
        object: &str,
        graph: &str,
        interval: Interval,
    ) -> Result<()> {
        AtomDictionary::check_position(subject, TriplePosition::Subject)?;
        AtomDictionary::check_position(predicate, TriplePosition::Predicate)?;
        AtomDictionary::check_position(object, TriplePosition::Object)?;
        AtomDictionary::check_position(graph, TriplePosition::Graph)?;

        let atoms = self.store.atoms.clone();
        let s = atoms.intern(subject)?;
        let p = atoms.intern(predicate)?;
        let o = atoms.intern(object)?;
        let g = atoms.intern(graph)?;
        self.assert_unchecked(s, p, o, g, interval)
    }

    pub fn assert_terms(
        &mut self,
        subject: &Term,
        predicate: &Term,
        object: &Term,
        graph: Option<&Term>,
        interval: Interval,
    ) -> Result<()> {
        let graph = graph.map(|g| g.canonical()).unwrap_or_default();
        self.assert_canonical(
            &subject.canonical(),
            &predicate.canonical(),
            &object.canonical(),
            &graph,
            interval,
        )
    }

    /// Assert by atom id, validating positions through the dictionary.
    pub fn assert_atoms(
        &mut self,
        subject: AtomId,
        predicate: AtomId,
        object: AtomId,
        graph: AtomId,
        interval: Interval,
    ) -> Result<()> {
        let atoms = &self.store.atoms;
        for (atom, position) in [
            (subject, TriplePosition::Subject),
            (predicate, TriplePosition::Predicate),
            (object, TriplePosition::Object),
            (graph, TriplePosition::Graph),
        ] {
            let text = atoms.lookup(atom).ok_or_else(|| {
                StoreError::SchemaInvariant(format!("unknown atom {atom} in quad"))
            })?;
            AtomDictionary::check_position(&text, position)?;
        }
        self.assert_unchecked(subject, predicate, object, graph, interval)
    }

    /// Insert into all six indices, merging with any identical triple
    /// whose interval overlaps the new one.
    fn assert_unchecked(
        &mut self,
        s: AtomId,
        p: AtomId,
        o: AtomId,
        g: AtomId,
        interval: Interval,
    ) -> Result<()> {
        Interval::new(interval.from, interval.to)?;

        let key = [s.0, p.0, o.0, g.0];
        let mut overlapped = Vec::new();
        {
            let mut cursor = self.guard.trees[IndexOrder::Spog as usize].seek(&key)?;
            while let Some(tuple) = cursor.next()? {
                if tuple.key != key {
                    break;
                }
                let existing = Interval {
                    from: tuple.valid_from,
                    to: tuple.valid_to,
                };
                if existing.intersects(&interval) {
                    overlapped.push(existing);
                } else if tuple.valid_from >= interval.to {
                    break;
                }
            }
        }

        let mut merged = interval;
        for existing in &overlapped {
            merged = merged.merge(existing);
            self.remove_everywhere(s, p, o, g, existing)?;
            self.guard.quad_count -= 1;
        }
        self.insert_everywhere(s, p, o, g, &merged)?;
        self.guard.quad_count += 1;

        if g != AtomId::DEFAULT_GRAPH {
            self.guard.named_graphs.insert(g);
        }
        Ok(())
    }

    pub fn assert_current_atoms(
        &mut self,
        s: AtomId,
        p: AtomId,
        o: AtomId,
        g: AtomId,
    ) -> Result<()> {
        let from = self.store.now();
        self.assert_atoms(s, p, o, g, Interval::open_from(from))
    }

    /// Find the open-ended matching quad and close its interval at now.
    pub fn retract_current_atoms(
        &mut self,
        s: AtomId,
        p: AtomId,
        o: AtomId,
        g: AtomId,
    ) -> Result<bool> {
        let now = self.store.now();
        let key = [s.0, p.0, o.0, g.0];

        let mut open_interval = None;
        {
            let mut cursor = self.guard.trees[IndexOrder::Spog as usize].seek(&key)?;
            while let Some(tuple) = cursor.next()? {
                if tuple.key != key {
                    break;
                }
                if tuple.valid_to == FOREVER && tuple.valid_from <= now {
                    open_interval = Some(Interval {
                        from: tuple.valid_from,
                        to: tuple.valid_to,
                    });
                    break;
                }
            }
        }

        let Some(open) = open_interval else {
            return Ok(false);
        };

        self.remove_everywhere(s, p, o, g, &open)?;
        if open.from < now {
            let closed = Interval {
                from: open.from,
                to: now,
            };
            self.insert_everywhere(s, p, o, g, &closed)?;
        } else {
            // Asserted and retracted at the same moment: nothing was ever
            // observably valid
            self.guard.quad_count -= 1;
        }
        Ok(true)
    }

    pub fn retract_current_terms(
        &mut self,
        subject: &Term,
        predicate: &Term,
        object: &Term,
        graph: Option<&Term>,
    ) -> Result<bool> {
        let atoms = &self.store.atoms;
        let graph = graph.map(|g| g.canonical()).unwrap_or_default();
        let resolved = (
            atoms.get(&subject.canonical()),
            atoms.get(&predicate.canonical()),
            atoms.get(&object.canonical()),
            atoms.get(&graph),
        );
        let (Some(s), Some(p), Some(o), Some(g)) = resolved else {
            return Ok(false);
        };
        self.retract_current_atoms(s, p, o, g)
    }

    /// Whether `graph` has ever held a quad, as seen by this
    /// transaction (effects of the current batch included).
    pub fn graph_exists(&self, graph: AtomId) -> bool {
        graph == AtomId::DEFAULT_GRAPH || self.guard.named_graphs.contains(&graph)
    }

    /// Close a specific quad's interval at now, regardless of whether it
    /// is open-ended. Used by bulk retraction (CLEAR and friends).
    pub fn close_quad(&mut self, quad: &Quad) -> Result<()> {
        let now = self.store.now();
        if !quad.interval.contains(now) && !quad.interval.is_open() && quad.interval.to <= now {
            // already closed in the past
            return Ok(());
        }
        self.remove_everywhere(
            quad.subject,
            quad.predicate,
            quad.object,
            quad.graph,
            &quad.interval,
        )?;
        if quad.interval.from < now {
            let closed = Interval {
                from: quad.interval.from,
                to: now,
            };
            self.insert_everywhere(quad.subject, quad.predicate, quad.object, quad.graph, &closed)?;
        } else {
            self.guard.quad_count -= 1;
        }
        Ok(())
    }

    fn insert_everywhere(
        &mut self,
        s: AtomId,
        p: AtomId,
        o: AtomId,
        g: AtomId,
        interval: &Interval,
    ) -> Result<()> {
        for order in IndexOrder::ALL {
            let tuple = IndexTuple::new(
                order.to_key(s.0, p.0, o.0, g.0),
                interval.from,
                interval.to,
            );
            self.guard.trees[order as usize].insert(self.txn, tuple)?;
        }
        Ok(())
    }

    fn remove_everywhere(
        &mut self,
        s: AtomId,
        p: AtomId,
        o: AtomId,
        g: AtomId,
        interval: &Interval,
    ) -> Result<()> {
        for order in IndexOrder::ALL {
            let tuple = IndexTuple::new(
                order.to_key(s.0, p.0, o.0, g.0),
                interval.from,
                interval.to,
            );
            if !self.guard.trees[order as usize].remove(self.txn, &tuple)? {
                return Err(StoreError::Corruption(format!(
                    "quad missing from {order:?} index"
                )));
            }
        }
        Ok(())
    }

    /// Query against this transaction's uncommitted state. Only the
    /// writer can observe these quads.
    pub fn scan(&self, pattern: QuadPattern, scope: TemporalScope) -> Result<Vec<Quad>> {
        let order = choose_index(pattern.bound_mask());
        let prefix = order.seek_prefix(
            pattern.subject.map(|a| a.0),
            pattern.predicate.map(|a| a.0),
            pattern.object.map(|a| a.0),
            pattern.graph.map(|a| a.0),
        );
        let scope = scope.resolve(self.store.now());
        let mut cursor = self.guard.trees[order as usize].seek(&prefix)?;
        let mut out = Vec::new();
        while let Some(tuple) = cursor.next()? {
            if !tuple.matches_prefix(&prefix) {
                break;
            }
            let (s, p, o, g) = self.order_unpack(order, tuple);
            if pattern.subject.is_some_and(|a| a != s)
                || pattern.predicate.is_some_and(|a| a != p)
                || pattern.object.is_some_and(|a| a != o)
                || pattern.graph.is_some_and(|a| a != g)
            {
                continue;
            }
            let interval = Interval {
                from: tuple.valid_from,
                to: tuple.valid_to,
            };
            if scope.admits(&interval) {
                out.push(Quad {
                    subject: s,
                    predicate: p,
                    object: o,
                    graph: g,
                    interval,
                });
            }
        }
        Ok(out)
    }

    fn order_unpack(&self, order: IndexOrder, tuple: IndexTuple) -> (AtomId, AtomId, AtomId, AtomId) {
        let (s, p, o, g) = order.from_key(tuple.key);
        (AtomId(s), AtomId(p), AtomId(o), AtomId(g))
    }

    /// Persist the superblock, make the atom heap durable, and commit the
    /// page transaction. Amortizes WAL and index writes across the batch.
    pub fn commit(mut self) -> Result<()> {
        let mut sb = Superblock::new(self.store.cache.page_size());
        for (i, tree) in self.guard.trees.iter().enumerate() {
            sb.index_roots[i] = tree.root();
        }
        sb.quad_count = self.guard.quad_count;

        let frame = self.store.cache.begin_write(self.txn, SUPERBLOCK_PAGE)?;
        sb.encode_into(&mut frame.write().data)?;
        drop(frame);

        // Atom heap must be durable before the commit frame: a committed
        // quad may never reference a lost atom
        self.store.atoms.sync()?;
        self.store.cache.commit_transaction(self.txn)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for WriteBatch<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let txn = self.txn;
        if let Err(e) = self.store.rollback(&mut self.guard, txn) {
            warn!(error = %e, txn, "batch rollback failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> QuadStore {
        QuadStore::open(&Config::new(dir.path()).with_page_size(512)).unwrap()
    }

    fn iri(s: &str) -> Term {
        Term::iri(s)
    }

    #[test]
    fn test_assert_and_query_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store
            .assert_current(&iri("http://ex/s"), &iri("http://ex/p"), &Term::literal("v"), None)
            .unwrap();

        let mut cursor = store.query(QuadPattern::any(), TemporalScope::Now).unwrap();
        let quad = cursor.next().unwrap().unwrap();
        assert!(quad.in_default_graph());
        assert_eq!(
            &*store.atoms().lookup(quad.object).unwrap(),
            "\"v\""
        );
        assert!(cursor.next().unwrap().is_none());
    }

    #[test]
    fn test_quad_in_every_index() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store
            .assert_current(&iri("http://ex/s"), &iri("http://ex/p"), &iri("http://ex/o"), None)
            .unwrap();

        let s = store.atoms().get("<http://ex/s>").unwrap();
        let p = store.atoms().get("<http://ex/p>").unwrap();
        let o = store.atoms().get("<http://ex/o>").unwrap();

        // Each bound combination routes to a different ordering; all must
        // observe the quad
        let patterns = [
            QuadPattern { subject: Some(s), ..Default::default() },
            QuadPattern { predicate: Some(p), ..Default::default() },
            QuadPattern { object: Some(o), ..Default::default() },
            QuadPattern { subject: Some(s), object: Some(o), ..Default::default() },
            QuadPattern { predicate: Some(p), object: Some(o), ..Default::default() },
            QuadPattern { subject: Some(s), predicate: Some(p), object: Some(o), ..Default::default() },
        ];
        for pattern in patterns {
            assert!(store.contains_current(pattern).unwrap(), "{pattern:?}");
        }
    }

    #[test]
    fn test_named_graph_isolation() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store
            .assert_current(
                &iri("http://ex/s"),
                &iri("http://ex/p"),
                &Term::literal("v"),
                Some(&iri("http://ex/g1")),
            )
            .unwrap();

        let s = store.atoms().get("<http://ex/s>").unwrap();
        let g1 = store.atoms().get("<http://ex/g1>").unwrap();

        let default_only = QuadPattern {
            subject: Some(s),
            graph: Some(AtomId::DEFAULT_GRAPH),
            ..Default::default()
        };
        assert!(!store.contains_current(default_only).unwrap());

        let in_g1 = QuadPattern {
            subject: Some(s),
            graph: Some(g1),
            ..Default::default()
        };
        assert!(store.contains_current(in_g1).unwrap());
        assert_eq!(store.named_graphs(), vec![g1]);
    }

    #[test]
    fn test_bitemporal_as_of() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let x = iri("http://ex/x");
        let p = iri("http://ex/p");

        let mut batch = store.begin_batch().unwrap();
        batch
            .assert_terms(&x, &p, &Term::literal("1"), None, Interval::new(10, 20).unwrap())
            .unwrap();
        batch
            .assert_terms(&x, &p, &Term::literal("2"), None, Interval::open_from(30))
            .unwrap();
        batch.commit().unwrap();

        let one = store.atoms().get("\"1\"").unwrap();
        let two = store.atoms().get("\"2\"").unwrap();

        let at = |t: Moment| {
            let mut cursor = store.query_as_of(QuadPattern::any(), t).unwrap();
            cursor.collect_all().unwrap()
        };

        let v15 = at(15);
        assert_eq!(v15.len(), 1);
        assert_eq!(v15[0].object, one);

        assert!(at(25).is_empty());

        let v35 = at(35);
        assert_eq!(v35.len(), 1);
        assert_eq!(v35[0].object, two);
    }

    #[test]
    fn test_query_between_intersects() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let mut batch = store.begin_batch().unwrap();
        batch
            .assert_terms(
                &iri("http://ex/x"),
                &iri("http://ex/p"),
                &Term::literal("1"),
                None,
                Interval::new(10, 20).unwrap(),
            )
            .unwrap();
        batch.commit().unwrap();

        let count = |t1, t2| {
            store
                .query_between(QuadPattern::any(), t1, t2)
                .unwrap()
                .collect_all()
                .unwrap()
                .len()
        };
        assert_eq!(count(1, 9), 0);
        assert_eq!(count(5, 11), 1);
        assert_eq!(count(19, 40), 1);
        assert_eq!(count(20, 40), 0);
    }

    #[test]
    fn test_retract_closes_interval() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let s = iri("http://ex/s");
        let p = iri("http://ex/p");
        let o = Term::literal("v");

        store.assert_current(&s, &p, &o, None).unwrap();
        assert!(store.retract_current(&s, &p, &o, None).unwrap());
        assert!(!store.retract_current(&s, &p, &o, None).unwrap());

        assert!(!store.contains_current(QuadPattern::any()).unwrap());
        // History is preserved
        let mut all = store.query(QuadPattern::any(), TemporalScope::All).unwrap();
        let quads = all.collect_all().unwrap();
        assert_eq!(quads.len(), 1);
        assert!(!quads[0].interval.is_open());
    }

    #[test]
    fn test_overlapping_asserts_merge_intervals() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let mut batch = store.begin_batch().unwrap();
        let s = iri("http://ex/s");
        let p = iri("http://ex/p");
        let o = Term::literal("v");
        batch
            .assert_terms(&s, &p, &o, None, Interval::new(10, 30).unwrap())
            .unwrap();
        batch
            .assert_terms(&s, &p, &o, None, Interval::new(20, 50).unwrap())
            .unwrap();
        batch.commit().unwrap();

        let mut all = store.query(QuadPattern::any(), TemporalScope::All).unwrap();
        let quads = all.collect_all().unwrap();
        assert_eq!(quads.len(), 1);
        assert_eq!(quads[0].interval, Interval::new(10, 50).unwrap());
        assert_eq!(store.stats().quads, 1);
    }

    #[test]
    fn test_literal_in_predicate_rejected() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let result = store.assert_current(
            &iri("http://ex/s"),
            &Term::literal("not a predicate"),
            &Term::literal("v"),
            None,
        );
        assert!(matches!(result, Err(StoreError::SchemaInvariant(_))));
        assert_eq!(store.stats().quads, 0);
    }

    #[test]
    fn test_batch_rollback_on_drop() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        {
            let mut batch = store.begin_batch().unwrap();
            batch
                .assert_terms(
                    &iri("http://ex/s"),
                    &iri("http://ex/p"),
                    &Term::literal("v"),
                    None,
                    Interval::open_from(5),
                )
                .unwrap();
            // Dropped without commit
        }

        assert!(!store.contains_current(QuadPattern::any()).unwrap());
        assert_eq!(store.stats().quads, 0);
    }

    #[test]
    fn test_writer_sees_uncommitted_readers_do_not() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let mut batch = store.begin_batch().unwrap();
        batch
            .assert_terms(
                &iri("http://ex/s"),
                &iri("http://ex/p"),
                &Term::literal("v"),
                None,
                Interval::open_from(5),
            )
            .unwrap();
        let visible = batch.scan(QuadPattern::any(), TemporalScope::Now).unwrap();
        assert_eq!(visible.len(), 1);
        drop(batch);
    }

    #[test]
    fn test_reopen_preserves_committed_quads() {
        let dir = TempDir::new().unwrap();
        {
            let store = open_store(&dir);
            store
                .assert_current(&iri("http://ex/s"), &iri("http://ex/p"), &Term::literal("v"), None)
                .unwrap();
        }

        let store = open_store(&dir);
        assert_eq!(store.stats().quads, 1);
        assert!(store.contains_current(QuadPattern::any()).unwrap());
    }

    #[test]
    fn test_disposed_store_rejects_operations() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store.dispose().unwrap();

        assert!(matches!(
            store.query(QuadPattern::any(), TemporalScope::Now),
            Err(StoreError::Disposed)
        ));
        assert!(matches!(store.begin_batch(), Err(StoreError::Disposed)));
    }

    #[test]
    fn test_monotonic_clock() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let a = store.now();
        let b = store.now();
        let c = store.now();
        assert!(a < b && b < c);
    }
}
