//! Process-wide recycling pool for channel buffers.
//!
//! Blocks allocate and free channel memory constantly while streaming, so
//! freed buffers are kept in per-size free lists instead of going back to
//! the allocator. Buffers are stored as 64-bit words so every channel depth
//! gets a correctly aligned typed view.
//!
//! The pool never clears recycled memory; callers prime buffers through the
//! channel fill path before use.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Global pool shared by every block in the process.
pub static BLOCK_MEMORY_POOL: Lazy<BlockMemoryPool> = Lazy::new(BlockMemoryPool::new);

/// Number of 64-bit words backing a buffer of `size_in_bytes` bytes.
#[inline]
pub fn words_for(size_in_bytes: usize) -> usize {
    (size_in_bytes + 7) / 8
}

/// Size-classed recycler for channel buffers.
///
/// Free lists are keyed by word count. Safe to call from any thread.
pub struct BlockMemoryPool {
    free_lists: Mutex<HashMap<usize, Vec<Box<[u64]>>>>,
    /// Bytes currently held in free lists
    pooled_bytes: AtomicUsize,
    /// Buffers handed out and not yet recycled
    outstanding: AtomicUsize,
}

impl BlockMemoryPool {
    pub fn new() -> Self {
        Self {
            free_lists: Mutex::new(HashMap::new()),
            pooled_bytes: AtomicUsize::new(0),
            outstanding: AtomicUsize::new(0),
        }
    }

    /// Take a buffer large enough for `size_in_bytes` bytes.
    ///
    /// Recycled buffers come back with stale contents.
    pub fn allocate(&self, size_in_bytes: usize) -> Box<[u64]> {
        let words = words_for(size_in_bytes);
        let recycled = {
            let mut free_lists = self.free_lists.lock().unwrap();
            free_lists.get_mut(&words).and_then(|list| list.pop())
        };
        self.outstanding.fetch_add(1, Ordering::Relaxed);
        match recycled {
            Some(buffer) => {
                self.pooled_bytes.fetch_sub(words * 8, Ordering::Relaxed);
                buffer
            }
            None => vec![0u64; words].into_boxed_slice(),
        }
    }

    /// Return a buffer to its size class.
    pub fn recycle(&self, buffer: Box<[u64]>) {
        let words = buffer.len();
        self.pooled_bytes.fetch_add(words * 8, Ordering::Relaxed);
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
        let mut free_lists = self.free_lists.lock().unwrap();
        free_lists.entry(words).or_default().push(buffer);
    }

    /// Drop every pooled buffer. Outstanding allocations are unaffected.
    pub fn clear(&self) {
        let mut free_lists = self.free_lists.lock().unwrap();
        free_lists.clear();
        self.pooled_bytes.store(0, Ordering::Relaxed);
    }

    /// Bytes currently sitting in free lists.
    pub fn debug_pooled_bytes(&self) -> usize {
        self.pooled_bytes.load(Ordering::Relaxed)
    }

    /// Buffers handed out and not yet recycled.
    pub fn debug_outstanding_count(&self) -> usize {
        self.outstanding.load(Ordering::Relaxed)
    }
}

impl Default for BlockMemoryPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_words_for() {
        assert_eq!(words_for(1), 1);
        assert_eq!(words_for(8), 1);
        assert_eq!(words_for(9), 2);
        assert_eq!(words_for(4096), 512);
    }

    #[test]
    fn test_allocate_sizes() {
        let pool = BlockMemoryPool::new();
        assert_eq!(pool.allocate(1).len(), 1);
        assert_eq!(pool.allocate(100).len(), 13);
    }

    #[test]
    fn test_recycle_reuses_buffer() {
        let pool = BlockMemoryPool::new();
        let mut buffer = pool.allocate(64);
        buffer[0] = 0xdead_beef;
        pool.recycle(buffer);
        assert_eq!(pool.debug_pooled_bytes(), 64);

        // Same size class comes back from the free list, contents stale.
        let reused = pool.allocate(64);
        assert_eq!(reused[0], 0xdead_beef);
        assert_eq!(pool.debug_pooled_bytes(), 0);
    }

    #[test]
    fn test_outstanding_count() {
        let pool = BlockMemoryPool::new();
        let a = pool.allocate(16);
        let b = pool.allocate(32);
        assert_eq!(pool.debug_outstanding_count(), 2);
        pool.recycle(a);
        pool.recycle(b);
        assert_eq!(pool.debug_outstanding_count(), 0);
    }

    #[test]
    fn test_clear() {
        let pool = BlockMemoryPool::new();
        let buffer = pool.allocate(128);
        pool.recycle(buffer);
        assert!(pool.debug_pooled_bytes() > 0);
        pool.clear();
        assert_eq!(pool.debug_pooled_bytes(), 0);
    }

    #[test]
    fn test_concurrent_allocate_recycle() {
        let pool = Arc::new(BlockMemoryPool::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let pool = pool.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..200 {
                    let buffer = pool.allocate(1 + (i % 7) * 100);
                    pool.recycle(buffer);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(pool.debug_outstanding_count(), 0);
    }
}
