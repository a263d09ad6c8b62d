use crate::error::out_of_memory;
use corosensei::stack::DefaultStack;
use spin::Mutex;
use std::collections::btree_map::BTreeMap;

/// Stacks kept around per size class before extra frees are returned to the OS.
const MAX_POOLED_PER_SIZE: usize = 32;

/// Frees between two shrink passes.
const FREES_PER_SHRINK: usize = 64;

pub type Stack = DefaultStack;

/// Recycles context stacks, keyed by their requested size.
pub struct StackPool {
    inner: Mutex<PoolInner>,
}

struct PoolInner {
    sets: BTreeMap<usize, Vec<PooledStack>>,

    /// Used to determine when to shrink.
    free_count_before_shrink: usize,
}

struct PooledStack(Stack);

// An idle stack is a plain memory mapping that nothing executes on.
unsafe impl Send for PooledStack {}

impl StackPool {
    pub fn new() -> StackPool {
        StackPool {
            inner: Mutex::new(PoolInner {
                sets: BTreeMap::new(),
                free_count_before_shrink: 0,
            }),
        }
    }

    /// Takes a stack of `size` bytes, mapping a fresh one when none is pooled.
    ///
    /// Aborts the process if the OS cannot provide one.
    pub fn allocate(&self, size: usize) -> Stack {
        let pooled = self
            .inner
            .lock()
            .sets
            .get_mut(&size)
            .and_then(|set| set.pop());
        match pooled {
            Some(PooledStack(stack)) => stack,
            None => match DefaultStack::new(size) {
                Ok(stack) => stack,
                Err(e) => out_of_memory("StackPool::allocate", &e),
            },
        }
    }

    pub fn free(&self, size: usize, stack: Stack) {
        let mut inner = self.inner.lock();
        let set = inner.sets.entry(size).or_insert_with(Vec::new);
        if set.len() < MAX_POOLED_PER_SIZE {
            set.push(PooledStack(stack));
        }

        if inner.free_count_before_shrink == FREES_PER_SHRINK {
            inner.free_count_before_shrink = 0;
            inner.shrink();
        } else {
            inner.free_count_before_shrink += 1;
        }
    }

    /// Number of idle stacks of `size` bytes.
    pub fn pooled(&self, size: usize) -> usize {
        self.inner.lock().sets.get(&size).map_or(0, |set| set.len())
    }
}

impl PoolInner {
    /// Drops the size classes that have no idle stacks left.
    fn shrink(&mut self) {
        self.sets.retain(|_, set| !set.is_empty());
    }
}

impl Default for StackPool {
    fn default() -> Self {
        StackPool::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuses_freed_stacks() {
        let pool = StackPool::new();
        let stack = pool.allocate(128 << 10);
        assert_eq!(pool.pooled(128 << 10), 0);
        pool.free(128 << 10, stack);
        assert_eq!(pool.pooled(128 << 10), 1);
        let _again = pool.allocate(128 << 10);
        assert_eq!(pool.pooled(128 << 10), 0);
    }

    #[test]
    fn caps_idle_stacks() {
        let pool = StackPool::new();
        let stacks: Vec<_> = (0..MAX_POOLED_PER_SIZE + 4)
            .map(|_| pool.allocate(64 << 10))
            .collect();
        for s in stacks {
            pool.free(64 << 10, s);
        }
        assert_eq!(pool.pooled(64 << 10), MAX_POOLED_PER_SIZE);
    }
}
