use crate::{Partitioner, Result};
use foldhash::fast::RandomState;
use parking_lot::RwLock;
use std::borrow::Borrow;
use std::collections::HashSet;
use std::hash::Hash;

/// A thread-safe hash set guarded by a single `RwLock`.
///
/// [`add`](Self::add) reports whether the value was newly inserted, and
/// [`remove`](Self::remove) whether it was present. [`ShardedSet`] follows the
/// same contract.
///
/// # Examples
/// ```
/// use shardsafe::ConcurrentSet;
///
/// let set = ConcurrentSet::new();
/// assert!(set.add(1));
/// assert!(!set.add(1));
/// assert!(set.contains(&1));
/// assert!(set.remove(&1));
/// assert!(!set.contains(&1));
/// ```
#[derive(Debug)]
pub struct ConcurrentSet<T> {
    set: RwLock<HashSet<T, RandomState>>,
}

impl<T> Default for ConcurrentSet<T>
where
    T: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ConcurrentSet<T>
where
    T: Eq + Hash,
{
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            set: RwLock::new(HashSet::with_capacity_and_hasher(
                capacity,
                RandomState::default(),
            )),
        }
    }

    /// Adds `value`. Returns `false` and leaves the set unchanged if it was already present.
    pub fn add(&self, value: T) -> bool {
        self.set.write().insert(value)
    }

    pub fn contains<Q>(&self, value: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.set.read().contains(value)
    }

    /// Removes `value`. Returns `false` if it was absent.
    pub fn remove<Q>(&self, value: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.set.write().remove(value)
    }

    /// Calls `f` for each value until it returns `false`.
    ///
    /// **Locking behaviour:** the shared lock is held for the whole traversal.
    /// Mutating this set from inside `f` deadlocks.
    pub fn range<F>(&self, mut f: F)
    where
        F: FnMut(&T) -> bool,
    {
        self.range_until(&mut f);
    }

    /// Returns a snapshot of the values.
    pub fn values(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.set.read().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.set.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.read().is_empty()
    }

    fn range_until<F>(&self, f: &mut F) -> bool
    where
        F: FnMut(&T) -> bool,
    {
        self.set.read().iter().all(|value| f(value))
    }
}

/// A hash set split into independently locked [`ConcurrentSet`] shards.
///
/// `len`, `values` and `range` visit shards one at a time and may be stale
/// under concurrent writes.
#[derive(Debug)]
pub struct ShardedSet<T> {
    shards: Vec<ConcurrentSet<T>>,
    partitioner: Partitioner,
}

impl<T> Default for ShardedSet<T>
where
    T: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ShardedSet<T>
where
    T: Eq + Hash,
{
    /// Creates a new `ShardedSet` with one shard per available CPU.
    pub fn new() -> Self {
        let partitioner = Partitioner::default();
        Self {
            shards: (0..partitioner.shard_amount())
                .map(|_| ConcurrentSet::new())
                .collect(),
            partitioner,
        }
    }

    /// Creates a new `ShardedSet` with the specified number of shards.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`](crate::Error::InvalidConfiguration)
    /// if `shard_amount` is zero.
    pub fn with_shard_amount(shard_amount: usize) -> Result<Self> {
        let partitioner = Partitioner::new(shard_amount)?;
        Ok(Self {
            shards: (0..shard_amount).map(|_| ConcurrentSet::new()).collect(),
            partitioner,
        })
    }

    pub fn add(&self, value: T) -> bool {
        self.shard(&value).add(value)
    }

    pub fn contains<Q>(&self, value: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.shard(value).contains(value)
    }

    pub fn remove<Q>(&self, value: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.shard(value).remove(value)
    }

    /// Calls `f` for each value, shard by shard, until it returns `false`.
    pub fn range<F>(&self, mut f: F)
    where
        F: FnMut(&T) -> bool,
    {
        for shard in &self.shards {
            if !shard.range_until(&mut f) {
                return;
            }
        }
    }

    pub fn values(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.shards.iter().flat_map(|s| s.values()).collect()
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.is_empty())
    }

    pub fn shard_amount(&self) -> usize {
        self.shards.len()
    }

    pub fn shards(&self) -> &[ConcurrentSet<T>] {
        &self.shards
    }

    #[inline(always)]
    fn shard<Q>(&self, value: &Q) -> &ConcurrentSet<T>
    where
        T: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        &self.shards[self.partitioner.shard(value)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Barrier,
    };
    use std::time::Duration;

    #[test]
    fn test_set_add_is_idempotent() {
        let set = ConcurrentSet::new();
        assert!(set.add(1));
        assert_eq!(set.len(), 1);
        assert!(!set.add(1));
        assert!(set.contains(&1));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_set_remove() {
        let set = ConcurrentSet::<String>::new();
        set.add("a".to_string());
        assert!(set.remove("a"));
        assert!(!set.remove("a"));
        assert!(!set.contains("a"));
        assert!(set.is_empty());
    }

    #[test]
    fn test_set_range() {
        let set = ConcurrentSet::with_capacity(4);
        set.add(1);
        set.add(2);
        set.add(3);

        let mut sum = 0;
        set.range(|value| {
            sum += value;
            true
        });
        assert_eq!(sum, 6);

        let mut seen = 0;
        set.range(|_| {
            seen += 1;
            false
        });
        assert_eq!(seen, 1);
    }

    #[test]
    fn test_set_len() {
        let set = ConcurrentSet::new();
        assert_eq!(set.len(), 0);
        set.add(1);
        assert_eq!(set.len(), 1);
        set.add(2);
        assert_eq!(set.len(), 2);
        set.remove(&1);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_sharded_set() {
        let set = ShardedSet::<String>::with_shard_amount(8).unwrap();
        for i in 0..200 {
            assert!(set.add(format!("v{}", i)));
        }
        for i in 0..200 {
            assert!(!set.add(format!("v{}", i)));
            assert!(set.contains(format!("v{}", i).as_str()));
        }
        assert_eq!(set.len(), 200);
        assert_eq!(
            set.len(),
            set.shards().iter().map(|s| s.len()).sum::<usize>()
        );

        let mut values = set.values();
        values.sort();
        values.dedup();
        assert_eq!(values.len(), 200);

        let mut count = 0;
        set.range(|_| {
            count += 1;
            true
        });
        assert_eq!(count, 200);

        for i in 0..100 {
            assert!(set.remove(format!("v{}", i).as_str()));
        }
        assert_eq!(set.len(), 100);
        assert!(!set.contains("v0"));
        assert!(set.contains("v100"));
    }

    #[test]
    fn test_sharded_set_range_does_not_block_other_shards() {
        let set = Arc::new(ShardedSet::<u32>::with_shard_amount(4).unwrap());
        for i in 0..100 {
            set.add(i);
        }

        let mut writer = None;
        let mut added_while_reading = false;
        set.range(|value| {
            let visiting = crate::shard(value, set.shard_amount());
            let other = (1000..)
                .find(|v| crate::shard(v, set.shard_amount()) != visiting)
                .unwrap();
            let (done_tx, done_rx) = crossbeam_channel::bounded(1);
            let set = set.clone();
            writer = Some(std::thread::spawn(move || {
                assert!(set.add(other));
                done_tx.send(()).unwrap();
            }));
            added_while_reading = done_rx.recv_timeout(Duration::from_secs(5)).is_ok();
            false
        });

        writer.unwrap().join().unwrap();
        assert!(added_while_reading);
        assert_eq!(set.len(), 101);
    }

    #[test]
    fn test_sharded_set_rejects_zero_shards() {
        assert!(ShardedSet::<u32>::with_shard_amount(0).is_err());
        assert_eq!(ShardedSet::<u32>::new().shard_amount(), crate::default_shard_amount());
    }

    #[test]
    fn test_sharded_set_concurrent_add_single_insert() {
        let set = Arc::new(ShardedSet::<u32>::with_shard_amount(4).unwrap());
        const M: usize = 8;
        let barrier = Arc::new(Barrier::new(M));
        let inserted = Arc::new(AtomicUsize::default());

        let threads = (0..M)
            .map(|_| {
                let set = set.clone();
                let barrier = barrier.clone();
                let inserted = inserted.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    for i in 0..1000 {
                        if set.add(i) {
                            inserted.fetch_add(1, Ordering::AcqRel);
                        }
                    }
                })
            })
            .collect::<Vec<_>>();
        threads.into_iter().for_each(|t| t.join().unwrap());

        assert_eq!(inserted.load(Ordering::Acquire), 1000);
        assert_eq!(set.len(), 1000);
    }
}
