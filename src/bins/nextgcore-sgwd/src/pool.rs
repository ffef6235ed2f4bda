//! Index Pool
//!
//! Dense, reusable index allocation for sessions and bearers. An index handed
//! out here is also the local TEID of the entity that holds it, so the
//! sequence of allocated values is visible on the wire: indices start at 1
//! (TEID 0 means "not assigned" in GTP) and the smallest free one is always
//! handed out first.

use std::collections::BTreeSet;
use std::fmt;

use crate::error::{SgwError, SgwResult};

/// Entity category an index pool serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolKind {
    Session,
    Bearer,
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolKind::Session => write!(f, "session"),
            PoolKind::Bearer => write!(f, "bearer"),
        }
    }
}

/// Free-index pool for one entity category.
///
/// Indices above the high-water mark have never been handed out and are not
/// stored; only released indices below it are kept, so the pool costs memory
/// in proportion to its peak use rather than its capacity.
#[derive(Debug, Clone)]
pub struct IndexPool {
    kind: PoolKind,
    capacity: u32,
    /// Largest index handed out so far (0 before the first acquire)
    high_water: u32,
    /// Released indices below the high-water mark
    released: BTreeSet<u32>,
}

impl IndexPool {
    /// Create a pool holding indices `1..=capacity`
    pub fn new(kind: PoolKind, capacity: u32) -> Self {
        Self {
            kind,
            capacity,
            high_water: 0,
            released: BTreeSet::new(),
        }
    }

    /// Take the smallest free index
    pub fn acquire(&mut self) -> SgwResult<u32> {
        if let Some(index) = self.released.pop_first() {
            return Ok(index);
        }
        if self.high_water < self.capacity {
            self.high_water += 1;
            return Ok(self.high_water);
        }

        log::error!(
            "No free {} index (pool size {})",
            self.kind,
            self.capacity
        );
        Err(SgwError::ResourceExhausted(self.kind))
    }

    /// Return an index to the pool.
    ///
    /// Returns false (and leaves the pool untouched) for an index that is out
    /// of range or already free.
    pub fn release(&mut self, index: u32) -> bool {
        if index == 0 || index > self.capacity {
            log::error!("Release of out-of-range {} index {}", self.kind, index);
            return false;
        }
        if index > self.high_water || !self.released.insert(index) {
            log::error!("Double release of {} index {}", self.kind, index);
            return false;
        }

        // Fold released indices at the top back under the high-water mark
        while self.released.last() == Some(&self.high_water) {
            self.released.pop_last();
            self.high_water -= 1;
        }
        true
    }

    /// Check whether an index is currently held by a live entity
    pub fn is_allocated(&self, index: u32) -> bool {
        index != 0 && index <= self.high_water && !self.released.contains(&index)
    }

    pub fn kind(&self) -> PoolKind {
        self.kind
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of free indices
    pub fn available(&self) -> usize {
        (self.capacity - self.high_water) as usize + self.released.len()
    }

    /// Number of indices held by live entities
    pub fn used(&self) -> usize {
        self.high_water as usize - self.released.len()
    }

    /// Return every index to the pool
    pub fn reset(&mut self) {
        self.high_water = 0;
        self.released.clear();
    }
}
