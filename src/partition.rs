//! Key-based routing to determine shard assignment.
//!
//! Uses foldhash with a fixed seed so routing never changes within a process.

use crate::{default_shard_amount, Error, Result};
use foldhash::quality::FixedState;
use std::hash::{BuildHasher, Hash};

/// Maps `key` to a shard index in `0..shard_amount`.
///
/// # Panics
///
/// Panics if `shard_amount` is zero. Use [`Partitioner::new`] to validate it once.
#[inline(always)]
pub fn shard<Q>(key: &Q, shard_amount: usize) -> usize
where
    Q: Hash + ?Sized,
{
    assert!(shard_amount > 0, "shard_amount must be greater than zero");
    (FixedState::default().hash_one(key) % shard_amount as u64) as usize
}

/// Routes keys to a fixed number of shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partitioner {
    shard_amount: usize,
}

impl Partitioner {
    /// Creates a partitioner over `shard_amount` shards.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] if `shard_amount` is zero.
    pub fn new(shard_amount: usize) -> Result<Self> {
        if shard_amount == 0 {
            return Err(Error::InvalidConfiguration(
                "shard_amount must be greater than zero".to_string(),
            ));
        }
        Ok(Self { shard_amount })
    }

    /// Routes a key to its shard index.
    ///
    /// The same key always lands in the same shard, and a `String` key routes
    /// identically to its `&str` borrow.
    #[inline]
    pub fn shard<Q>(&self, key: &Q) -> usize
    where
        Q: Hash + ?Sized,
    {
        shard(key, self.shard_amount)
    }

    pub fn shard_amount(&self) -> usize {
        self.shard_amount
    }
}

impl Default for Partitioner {
    /// One shard per available CPU.
    fn default() -> Self {
        Self {
            shard_amount: default_shard_amount(),
        }
    }
}
