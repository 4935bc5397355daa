use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Buffer pool configuration
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Maximum buffers retained per size class
    pub max_per_class: usize,

    /// Largest capacity the pool will retain; bigger rents are served
    /// by plain allocation and dropped on return
    pub max_retained_capacity: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            max_per_class: 64,
            max_retained_capacity: 1 << 22,
        }
    }
}

/// Pool counters, exposed for tests and diagnostics
#[derive(Debug, Default)]
pub struct BufferPoolStats {
    pub rents: AtomicU64,
    pub pool_hits: AtomicU64,
    pub returns: AtomicU64,
}

impl BufferPoolStats {
    pub fn hit_rate(&self) -> f64 {
        let rents = self.rents.load(Ordering::Relaxed);
        if rents == 0 {
            return 0.0;
        }
        self.pool_hits.load(Ordering::Relaxed) as f64 / rents as f64
    }
}

/// Capability interface for renting scratch byte buffers.
///
/// `rent` never fails: on exhaustion the implementation falls back to a
/// fresh allocation. Rented buffers are not zero-initialized; the pool
/// clears them on return before they can be observed again.
pub trait BufferManager: Send + Sync {
    fn rent(self: Arc<Self>, min_capacity: usize) -> PooledBuf;

    fn recycle(&self, buf: Vec<u8>);
}

/// Scoped buffer rental; returns the buffer to its pool on drop.
pub struct PooledBuf {
    data: Option<Vec<u8>>,
    pool: Option<Arc<dyn BufferManager>>,
}

impl PooledBuf {
    pub fn detached(data: Vec<u8>) -> Self {
        Self {
            data: Some(data),
            pool: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.as_ref().map(Vec::capacity).unwrap_or(0)
    }

    /// Take the underlying storage, detaching it from the pool.
    pub fn into_inner(mut self) -> Vec<u8> {
        self.data.take().unwrap_or_default()
    }
}

impl Deref for PooledBuf {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        self.data.as_ref().expect("buffer already returned")
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        self.data.as_mut().expect("buffer already returned")
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        if let (Some(data), Some(pool)) = (self.data.take(), self.pool.take()) {
            pool.recycle(data);
        }
    }
}

/// Default `BufferManager` with power-of-two size classes.
pub struct PooledBufferManager {
    config: BufferPoolConfig,
    classes: Mutex<HashMap<usize, Vec<Vec<u8>>>>,
    stats: BufferPoolStats,
}

impl PooledBufferManager {
    pub fn new(config: BufferPoolConfig) -> Self {
        Self {
            config,
            classes: Mutex::new(HashMap::new()),
            stats: BufferPoolStats::default(),
        }
    }

    pub fn stats(&self) -> &BufferPoolStats {
        &self.stats
    }

    fn size_class(min_capacity: usize) -> usize {
        min_capacity.max(64).next_power_of_two()
    }
}

impl Default for PooledBufferManager {
    fn default() -> Self {
        Self::new(BufferPoolConfig::default())
    }
}

impl BufferManager for PooledBufferManager {
    fn rent(self: Arc<Self>, min_capacity: usize) -> PooledBuf {
        self.stats.rents.fetch_add(1, Ordering::Relaxed);
        let class = Self::size_class(min_capacity);

        let reused = self.classes.lock().get_mut(&class).and_then(Vec::pop);
        let data = match reused {
            Some(buf) => {
                self.stats.pool_hits.fetch_add(1, Ordering::Relaxed);
                buf
            }
            None => Vec::with_capacity(class),
        };

        PooledBuf {
            data: Some(data),
            pool: Some(self),
        }
    }

    fn recycle(&self, mut buf: Vec<u8>) {
        self.stats.returns.fetch_add(1, Ordering::Relaxed);
        let capacity = buf.capacity();
        if capacity > self.config.max_retained_capacity {
            return;
        }

        // Cleared before it can be rented again
        buf.clear();

        let mut classes = self.classes.lock();
        let list = classes.entry(capacity.next_power_of_two()).or_default();
        if list.len() < self.config.max_per_class {
            list.push(buf);
        }
    }
}

static SHARED_POOL: Lazy<Arc<PooledBufferManager>> =
    Lazy::new(|| Arc::new(PooledBufferManager::default()));

/// Process-wide default pool. Consumers accept an injected
/// `Arc<dyn BufferManager>` and use this only as the default.
pub fn shared_pool() -> Arc<PooledBufferManager> {
    SHARED_POOL.clone()
}
