/// Types that can be cleared and handed out again by a [`Pool`].
pub trait Recycle {
    /// Drops everything the instance owns from its previous use.
    fn recycle(&mut self);
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub allocated: u64,
    pub reused: u64,
    pub idle: usize,
}

/// Unbounded free list. Released instances are recycled before they are
/// stored, so whatever `acquire_or_else` returns carries no stale state.
pub struct Pool<T> {
    free: Vec<T>,
    allocated: u64,
    reused: u64,
}

impl<T: Recycle> Pool<T> {
    pub fn new() -> Self {
        Self {
            free: Vec::new(),
            allocated: 0,
            reused: 0,
        }
    }

    pub fn acquire_or_else(&mut self, make: impl FnOnce() -> T) -> T {
        match self.free.pop() {
            Some(item) => {
                self.reused += 1;
                item
            }
            None => {
                self.allocated += 1;
                tracing::trace!(
                    "pool miss, allocating {} (#{})",
                    std::any::type_name::<T>(),
                    self.allocated
                );
                make()
            }
        }
    }

    pub fn release(&mut self, mut item: T) {
        item.recycle();
        self.free.push(item);
    }

    pub fn prewarm(&mut self, count: usize, mut make: impl FnMut() -> T) {
        self.free.reserve(count);
        for _ in 0..count {
            self.allocated += 1;
            self.free.push(make());
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocated: self.allocated,
            reused: self.reused,
            idle: self.free.len(),
        }
    }
}

impl<T: Recycle> Default for Pool<T> {
    fn default() -> Self {
        Self::new()
    }
}
