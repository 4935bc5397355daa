// # Pooled Buffer Manager
//
// Rent/return scratch buffers shared by the parsers and the WAL append
// path. Buffers are recycled through per-size-class free lists and fall
// back to plain allocation when a class is exhausted.

mod buffer_pool;

pub use buffer_pool::{
    shared_pool, BufferManager, BufferPoolConfig, BufferPoolStats, PooledBuf, PooledBufferManager,
};
