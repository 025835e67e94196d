//! Pool of chunk cell arrays.
//!
//! Arrays are zeroed when released, so [`CellPool::acquire`] always hands out
//! an all-air array and never one still owned by another chunk.

use crate::coords::CHUNK_VOLUME;

/// Default number of released arrays kept for reuse.
pub const DEFAULT_POOL_CAPACITY: usize = 64;

/// Recycles fixed-size `u16` cell arrays of exactly [`CHUNK_VOLUME`] cells.
#[derive(Debug)]
pub struct CellPool {
    free: Vec<Box<[u16]>>,
    max_free: usize,
    allocated: usize,
}

impl CellPool {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_POOL_CAPACITY)
    }

    /// Creates a pool that retains at most `max_free` released arrays.
    pub fn with_capacity(max_free: usize) -> Self {
        Self {
            free: Vec::new(),
            max_free,
            allocated: 0,
        }
    }

    /// Takes a zero-filled array, reusing a released one when available.
    pub fn acquire(&mut self) -> Box<[u16]> {
        match self.free.pop() {
            Some(cells) => cells,
            None => {
                self.allocated += 1;
                vec![0u16; CHUNK_VOLUME].into_boxed_slice()
            }
        }
    }

    /// Clears `cells` and keeps it for reuse.
    ///
    /// # Panics
    ///
    /// Panics if `cells` is not exactly [`CHUNK_VOLUME`] long.
    pub fn release(&mut self, mut cells: Box<[u16]>) {
        assert_eq!(
            cells.len(),
            CHUNK_VOLUME,
            "released cell array has the wrong length"
        );
        if self.free.len() < self.max_free {
            cells.fill(0);
            self.free.push(cells);
        }
    }

    /// Arrays currently waiting for reuse.
    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    /// Arrays allocated over the pool's lifetime.
    pub fn allocated(&self) -> usize {
        self.allocated
    }
}

impl Default for CellPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_is_zeroed_and_sized() {
        let mut pool = CellPool::new();
        let cells = pool.acquire();
        assert_eq!(cells.len(), CHUNK_VOLUME);
        assert!(cells.iter().all(|&c| c == 0));
    }

    #[test]
    fn test_released_array_is_reused_zeroed() {
        let mut pool = CellPool::new();
        let mut cells = pool.acquire();
        cells[0] = 7;
        cells[CHUNK_VOLUME - 1] = 9;
        pool.release(cells);
        assert_eq!(pool.free_len(), 1);

        let again = pool.acquire();
        assert_eq!(pool.allocated(), 1);
        assert!(again.iter().all(|&c| c == 0));
    }

    #[test]
    fn test_capacity_bounds_free_list() {
        let mut pool = CellPool::with_capacity(1);
        let a = pool.acquire();
        let b = pool.acquire();
        pool.release(a);
        pool.release(b);
        assert_eq!(pool.free_len(), 1);
    }

    #[test]
    #[should_panic(expected = "wrong length")]
    fn test_wrong_length_rejected() {
        let mut pool = CellPool::new();
        pool.release(vec![0u16; 8].into_boxed_slice());
    }
}
