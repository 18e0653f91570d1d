//! Free-list object pool
//!
//! Pooled values are reset when returned, so nothing a session touched is
//! visible to the next checkout. Values returned beyond capacity are dropped.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Clears every per-use field before a value is reused
pub trait Reset {
    /// Reset to the freshly built state
    fn reset(&mut self);
}

/// Pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Values built because the free list was empty
    pub created: u64,
    /// Values served from the free list
    pub reused: u64,
    /// Values currently idle
    pub idle: usize,
}

/// Mutex-guarded free list
pub struct ObjectPool<T> {
    free: Mutex<Vec<Box<T>>>,
    capacity: AtomicUsize,
    created: AtomicU64,
    reused: AtomicU64,
}

impl<T: Reset> ObjectPool<T> {
    /// Create new pool keeping at most `capacity` idle values
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            capacity: AtomicUsize::new(capacity),
            created: AtomicU64::new(0),
            reused: AtomicU64::new(0),
        }
    }

    /// Change capacity; surplus idle values are dropped
    pub fn set_capacity(&self, capacity: usize) {
        self.capacity.store(capacity, Ordering::Relaxed);
        self.free.lock().truncate(capacity);
    }

    /// Capacity
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed)
    }

    /// Pop an idle value or build one
    pub fn get_or_else(&self, make: impl FnOnce() -> T) -> Box<T> {
        let idle = self.free.lock().pop();
        match idle {
            Some(value) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                value
            }
            None => {
                self.created.fetch_add(1, Ordering::Relaxed);
                Box::new(make())
            }
        }
    }

    /// Reset and return a value
    pub fn put(&self, mut value: Box<T>) {
        value.reset();
        let mut free = self.free.lock();
        if free.len() < self.capacity() {
            free.push(value);
        }
    }

    /// Counters
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.created.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            idle: self.free.lock().len(),
        }
    }
}

impl<T: Reset + Default> ObjectPool<T> {
    /// Pop an idle value or build a default one
    pub fn get(&self) -> Box<T> {
        self.get_or_else(T::default)
    }
}

impl<T> fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectPool")
            .field("type", &std::any::type_name::<T>())
            .field("idle", &self.free.lock().len())
            .field("capacity", &self.capacity.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Scratch {
        items: Vec<u32>,
    }

    impl Reset for Scratch {
        fn reset(&mut self) {
            self.items.clear();
        }
    }

    #[test]
    fn test_put_resets_before_reuse() {
        let pool: ObjectPool<Scratch> = ObjectPool::new(4);
        let mut value = pool.get();
        value.items.push(7);
        pool.put(value);

        let value = pool.get();
        assert!(value.items.is_empty());
        assert_eq!(
            pool.stats(),
            PoolStats {
                created: 1,
                reused: 1,
                idle: 0
            }
        );
    }

    #[test]
    fn test_capacity_bounds_idle_values() {
        let pool: ObjectPool<Scratch> = ObjectPool::new(1);
        let a = pool.get();
        let b = pool.get();
        pool.put(a);
        pool.put(b);
        assert_eq!(pool.stats().idle, 1);

        pool.set_capacity(0);
        assert_eq!(pool.stats().idle, 0);
    }
}
