use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Default number of idle buffers retained per size class.
pub const DEFAULT_MAX_IDLE_PER_BUCKET: usize = 4;

/// Buffer pool tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Idle buffers kept per size class; extra returns are dropped.
    pub max_idle_per_bucket: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_bucket: DEFAULT_MAX_IDLE_PER_BUCKET,
        }
    }
}

/// Snapshot of pool activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Total `rent` calls for non-empty buffers.
    pub rented: u64,
    /// Rents served from an idle buffer.
    pub reused: u64,
    /// Rents that had to allocate.
    pub allocated: u64,
    /// Buffers currently idle in the pool.
    pub idle: usize,
}

/// Reusable byte buffers bucketed by power-of-two size class.
///
/// Frames arrive continuously with varying sizes; renting from here keeps the
/// steady state free of allocator traffic. Safe to share between sessions.
#[derive(Debug, Default)]
pub struct BufferPool {
    config: PoolConfig,
    state: Mutex<PoolState>,
}

#[derive(Debug, Default)]
struct PoolState {
    buckets: HashMap<usize, Vec<Vec<u8>>>,
    stats: PoolStats,
}

fn size_class(size: usize) -> usize {
    size.checked_next_power_of_two().unwrap_or(size)
}

/// Largest class a buffer of `capacity` can serve.
fn class_for_capacity(capacity: usize) -> usize {
    if capacity.is_power_of_two() {
        capacity
    } else {
        1usize << (usize::BITS - 1 - capacity.leading_zeros())
    }
}

impl BufferPool {
    pub fn new() -> Self {
        Self::with_config(PoolConfig::default())
    }

    pub fn with_config(config: PoolConfig) -> Self {
        Self {
            config,
            state: Mutex::new(PoolState::default()),
        }
    }

    /// Rent a buffer whose length is exactly `size`.
    ///
    /// Reused buffers keep their previous contents; callers overwrite before
    /// reading.
    pub fn rent(&self, size: usize) -> Vec<u8> {
        if size == 0 {
            return Vec::new();
        }

        let class = size_class(size);
        let reused = {
            let mut state = self.lock();
            state.stats.rented += 1;
            let buf = state.buckets.get_mut(&class).and_then(Vec::pop);
            if buf.is_some() {
                state.stats.reused += 1;
                state.stats.idle -= 1;
            } else {
                state.stats.allocated += 1;
            }
            buf
        };

        let mut buf = reused.unwrap_or_else(|| Vec::with_capacity(class));
        if buf.len() >= size {
            buf.truncate(size);
        } else {
            buf.resize(size, 0);
        }
        buf
    }

    /// Hand a buffer back for reuse.
    pub fn give_back(&self, buf: Vec<u8>) {
        let capacity = buf.capacity();
        if capacity == 0 {
            return;
        }

        let class = class_for_capacity(capacity);
        let mut state = self.lock();
        let bucket = state.buckets.entry(class).or_default();
        if bucket.len() < self.config.max_idle_per_bucket {
            bucket.push(buf);
            state.stats.idle += 1;
        }
    }

    pub fn stats(&self) -> PoolStats {
        self.lock().stats
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
