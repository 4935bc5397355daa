// # Store Pool
//
// A bounded registry of named stores. Acquisition hands out leases;
// when over capacity the least-recently-used unleased store is closed
// and reopens from disk on its next acquisition.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::ops::Deref;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{Result, StoreError};
use crate::store::QuadStore;
use crate::Config;

struct PoolEntry {
    store: Arc<QuadStore>,
    leases: Arc<AtomicUsize>,
}

/// Managed pool of named quad stores, each living in its own
/// subdirectory under the pool root.
pub struct StorePool {
    root: PathBuf,
    config: Config,
    capacity: usize,
    stores: DashMap<String, PoolEntry>,
    lru: Mutex<VecDeque<String>>,
}

impl StorePool {
    pub fn new(config: Config) -> Self {
        Self {
            root: config.data_dir.clone(),
            capacity: config.pool_capacity.max(1),
            stores: DashMap::new(),
            lru: Mutex::new(VecDeque::new()),
            config,
        }
    }

    /// Acquire a lease on the named store, opening it if necessary.
    pub fn acquire(&self, name: &str) -> Result<StoreLease> {
        if name.is_empty() || name.contains(['/', '\\', '\0']) {
            return Err(StoreError::SchemaInvariant(format!(
                "invalid store name {name:?}"
            )));
        }

        if let Some(entry) = self.stores.get(name) {
            entry.leases.fetch_add(1, Ordering::AcqRel);
            let lease = StoreLease {
                store: entry.store.clone(),
                leases: entry.leases.clone(),
            };
            drop(entry);
            self.touch(name);
            return Ok(lease);
        }

        let mut config = self.config.clone();
        config.data_dir = self.root.join(name);
        let store = Arc::new(QuadStore::open(&config)?);
        debug!(name, "opened store");

        let leases = Arc::new(AtomicUsize::new(1));
        self.stores.insert(
            name.to_string(),
            PoolEntry {
                store: store.clone(),
                leases: leases.clone(),
            },
        );
        self.touch(name);
        self.evict_over_capacity();

        Ok(StoreLease { store, leases })
    }

    /// Number of currently open stores.
    pub fn open_count(&self) -> usize {
        self.stores.len()
    }

    fn touch(&self, name: &str) {
        let mut lru = self.lru.lock();
        if let Some(pos) = lru.iter().position(|n| n == name) {
            lru.remove(pos);
        }
        lru.push_back(name.to_string());
    }

    fn evict_over_capacity(&self) {
        while self.stores.len() > self.capacity {
            let victim = {
                let lru = self.lru.lock();
                lru.iter()
                    .find(|name| {
                        self.stores
                            .get(name.as_str())
                            .is_some_and(|e| e.leases.load(Ordering::Acquire) == 0)
                    })
                    .cloned()
            };

            let Some(name) = victim else {
                warn!(
                    open = self.stores.len(),
                    capacity = self.capacity,
                    "every pooled store is leased; deferring eviction"
                );
                return;
            };

            if let Some((_, entry)) = self.stores.remove(&name) {
                // Re-check under removal: a racing acquire may have leased it
                if entry.leases.load(Ordering::Acquire) > 0 {
                    self.stores.insert(
                        name.clone(),
                        PoolEntry {
                            store: entry.store,
                            leases: entry.leases,
                        },
                    );
                    continue;
                }
                debug!(name, "evicting least-recently-used store");
                if let Err(e) = entry.store.dispose() {
                    warn!(name, error = %e, "dispose on eviction failed");
                }
            }
            let mut lru = self.lru.lock();
            if let Some(pos) = lru.iter().position(|n| *n == name) {
                lru.remove(pos);
            }
        }
    }
}

/// Leased access to a pooled store; the store returns to the pool when
/// the lease is dropped.
pub struct StoreLease {
    store: Arc<QuadStore>,
    leases: Arc<AtomicUsize>,
}

impl Deref for StoreLease {
    type Target = QuadStore;

    fn deref(&self) -> &QuadStore {
        &self.store
    }
}

impl Drop for StoreLease {
    fn drop(&mut self) {
        self.leases.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::Term;
    use tempfile::TempDir;

    fn pool(dir: &TempDir, capacity: usize) -> StorePool {
        StorePool::new(
            Config::new(dir.path())
                .with_page_size(512)
                .with_pool_capacity(capacity),
        )
    }

    #[test]
    fn test_acquire_and_reuse() {
        let dir = TempDir::new().unwrap();
        let pool = pool(&dir, 4);

        let a = pool.acquire("alpha").unwrap();
        a.assert_current(
            &Term::iri("http://ex/s"),
            &Term::iri("http://ex/p"),
            &Term::literal("v"),
            None,
        )
        .unwrap();
        drop(a);

        let a = pool.acquire("alpha").unwrap();
        assert_eq!(a.stats().quads, 1);
        assert_eq!(pool.open_count(), 1);
    }

    #[test]
    fn test_lru_eviction_over_capacity() {
        let dir = TempDir::new().unwrap();
        let pool = pool(&dir, 2);

        let a = pool.acquire("a").unwrap();
        a.assert_current(
            &Term::iri("http://ex/s"),
            &Term::iri("http://ex/p"),
            &Term::literal("v"),
            None,
        )
        .unwrap();
        drop(a);
        drop(pool.acquire("b").unwrap());
        drop(pool.acquire("c").unwrap());

        // "a" was least recently used and unleased
        assert_eq!(pool.open_count(), 2);

        // Reacquiring reopens from disk with data intact
        let a = pool.acquire("a").unwrap();
        assert_eq!(a.stats().quads, 1);
    }

    #[test]
    fn test_leased_stores_survive_eviction() {
        let dir = TempDir::new().unwrap();
        let pool = pool(&dir, 1);

        let a = pool.acquire("a").unwrap();
        let b = pool.acquire("b").unwrap();
        // Both leased: the pool runs over capacity rather than closing
        assert_eq!(pool.open_count(), 2);
        assert!(a.stats().quads == 0 && b.stats().quads == 0);
    }

    #[test]
    fn test_invalid_names_rejected() {
        let dir = TempDir::new().unwrap();
        let pool = pool(&dir, 2);
        assert!(pool.acquire("").is_err());
        assert!(pool.acquire("a/b").is_err());
    }
}
