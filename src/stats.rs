//! Per-shard hit counters used to observe partition balance.

use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic per-shard counters.
///
/// Each counter sits on its own cache line so workers on different shards
/// never contend on the same line. Counters are only ever incremented by the
/// owning structure; callers get a read-only view.
#[derive(Debug)]
pub struct ShardStats {
    hits: Box<[CachePadded<AtomicU64>]>,
}

impl ShardStats {
    pub(crate) fn new(shard_amount: usize) -> Self {
        Self {
            hits: (0..shard_amount)
                .map(|_| CachePadded::new(AtomicU64::new(0)))
                .collect(),
        }
    }

    #[inline]
    pub(crate) fn add_hit(&self, shard: usize) {
        self.hits[shard].fetch_add(1, Ordering::Relaxed);
    }

    /// Number of shards tracked.
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// Returns the hit count of one shard.
    ///
    /// # Panics
    ///
    /// Panics if `shard` is out of range.
    pub fn hits(&self, shard: usize) -> u64 {
        self.hits[shard].load(Ordering::Relaxed)
    }

    /// Sums all shards. Not atomic across shards.
    pub fn total_hits(&self) -> u64 {
        self.hits.iter().map(|h| h.load(Ordering::Relaxed)).sum()
    }

    /// Copies every shard's count, in shard order.
    pub fn snapshot(&self) -> Vec<u64> {
        self.hits.iter().map(|h| h.load(Ordering::Relaxed)).collect()
    }
}

/// Push and pull counters of a [`ShardedChannelGroup`](crate::ShardedChannelGroup).
#[derive(Debug)]
pub struct ChannelStats {
    pushes: ShardStats,
    pulls: ShardStats,
}

impl ChannelStats {
    pub(crate) fn new(shard_amount: usize) -> Self {
        Self {
            pushes: ShardStats::new(shard_amount),
            pulls: ShardStats::new(shard_amount),
        }
    }

    /// Successful pushes routed to each shard.
    pub fn pushes(&self) -> &ShardStats {
        &self.pushes
    }

    /// Values taken off each shard's queue by `pull` workers.
    pub fn pulls(&self) -> &ShardStats {
        &self.pulls
    }
}
