use crate::{Partitioner, Result};
use foldhash::fast::RandomState;
use parking_lot::RwLock;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;

/// Represents the action to be taken on a value after [`ConcurrentMap::update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateAction<V> {
    /// Keep the current value (or absence) unchanged.
    Keep,
    /// Store the provided value, inserting the key if needed.
    Replace(V),
    /// Remove the key from the map.
    Remove,
}

/// A thread-safe hashmap shard.
///
/// This struct wraps a `HashMap` protected by a `RwLock`. Reads share the lock,
/// mutations take it exclusively, so every observed state is the result of a
/// serializable sequence of mutations on this shard.
#[derive(Debug)]
pub struct ConcurrentMap<K, V> {
    /// The underlying hashmap protected by a `RwLock`.
    map: RwLock<HashMap<K, V, RandomState>>,
}

impl<K, V> Default for ConcurrentMap<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> ConcurrentMap<K, V>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates a new `ConcurrentMap` with the specified initial capacity.
    ///
    /// # Arguments
    ///
    /// * `capacity` - The initial capacity of the hashmap.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            map: RwLock::new(HashMap::with_capacity_and_hasher(
                capacity,
                RandomState::default(),
            )),
        }
    }

    /// Returns a clone of the value stored for `key`.
    ///
    /// # Examples
    /// ```
    /// use shardsafe::ConcurrentMap;
    ///
    /// let map = ConcurrentMap::<String, u32>::new();
    /// map.store("key".to_string(), 42);
    /// assert_eq!(map.load("key"), Some(42));
    /// assert_eq!(map.load("missing"), None);
    /// ```
    pub fn load<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
        V: Clone,
    {
        self.map.read().get(key).cloned()
    }

    /// Inserts or overwrites the value for `key`.
    pub fn store(&self, key: K, value: V) {
        self.map.write().insert(key, value);
    }

    /// Returns the existing value for `key` if present, otherwise stores `value`.
    ///
    /// The check and the insert happen under one exclusive lock.
    ///
    /// # Returns
    ///
    /// `(actual, loaded)`: `loaded` is `true` when the key already existed, in
    /// which case `actual` is the existing value and the map is unchanged.
    pub fn load_or_store(&self, key: K, value: V) -> (V, bool)
    where
        V: Clone,
    {
        let mut map = self.map.write();
        match map.get(&key) {
            Some(actual) => (actual.clone(), true),
            None => {
                map.insert(key, value.clone());
                (value, false)
            }
        }
    }

    /// Removes `key`. Returns `false` if it was absent.
    pub fn delete<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.map.write().remove(key).is_some()
    }

    /// Removes `key` and returns the value it held.
    pub fn load_and_delete<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.map.write().remove(key)
    }

    /// Reads, replaces or removes the value for `key` in one step.
    ///
    /// `func` runs under the shard's exclusive lock.
    ///
    /// # Arguments
    ///
    /// * `key` - The key to update, insert or remove.
    /// * `func` - Receives the current value, if any, and returns the action plus a result.
    ///   `Replace` stores a new value, `Remove` deletes the key, `Keep` leaves it as is.
    ///
    /// # Returns
    ///
    /// The result returned by the provided function.
    pub fn update<F, R>(&self, key: K, func: F) -> R
    where
        F: FnOnce(Option<&mut V>) -> (UpdateAction<V>, R),
    {
        let mut map = self.map.write();
        let (action, ret) = func(map.get_mut(&key));
        match action {
            UpdateAction::Keep => {}
            UpdateAction::Replace(value) => {
                map.insert(key, value);
            }
            UpdateAction::Remove => {
                map.remove(&key);
            }
        }
        ret
    }

    /// Calls `f` for each entry until it returns `false`.
    ///
    /// **Locking behaviour:** the shared lock is held for the whole traversal.
    /// Mutating this map from inside `f` deadlocks.
    pub fn range<F>(&self, mut f: F)
    where
        F: FnMut(&K, &V) -> bool,
    {
        let map = self.map.read();
        for (key, value) in map.iter() {
            if !f(key, value) {
                return;
            }
        }
    }

    /// Returns a snapshot of the keys.
    pub fn keys(&self) -> Vec<K>
    where
        K: Clone,
    {
        self.map.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }

    /// Like `range`, but stops the caller's outer traversal too.
    fn range_until<F>(&self, f: &mut F) -> bool
    where
        F: FnMut(&K, &V) -> bool,
    {
        let map = self.map.read();
        map.iter().all(|(key, value)| f(key, value))
    }
}

/// A hashmap split into independently locked [`ConcurrentMap`] shards.
///
/// Writers to different shards never block each other. Aggregates such as
/// [`len`](Self::len) and [`keys`](Self::keys) visit shards one at a time, so
/// they are snapshots that may be stale under concurrent writes.
#[derive(Debug)]
pub struct ShardedMap<K, V> {
    /// The vector of `ConcurrentMap` instances.
    shards: Vec<ConcurrentMap<K, V>>,
    partitioner: Partitioner,
}

impl<K, V> Default for ShardedMap<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> ShardedMap<K, V>
where
    K: Eq + Hash,
{
    /// Creates a new `ShardedMap` with one shard per available CPU.
    pub fn new() -> Self {
        let partitioner = Partitioner::default();
        Self {
            shards: (0..partitioner.shard_amount())
                .map(|_| ConcurrentMap::new())
                .collect(),
            partitioner,
        }
    }

    /// Creates a new `ShardedMap` with the specified number of shards.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`](crate::Error::InvalidConfiguration)
    /// if `shard_amount` is zero.
    pub fn with_shard_amount(shard_amount: usize) -> Result<Self> {
        Self::with_capacity_and_shard_amount(0, shard_amount)
    }

    /// Creates a new `ShardedMap` with the specified capacity and number of shards.
    ///
    /// # Arguments
    ///
    /// * `capacity` - The total initial capacity of the hashmap.
    /// * `shard_amount` - The number of shards to create.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`](crate::Error::InvalidConfiguration)
    /// if `shard_amount` is zero.
    pub fn with_capacity_and_shard_amount(capacity: usize, shard_amount: usize) -> Result<Self> {
        let partitioner = Partitioner::new(shard_amount)?;
        let shard_capacity = capacity / shard_amount;
        Ok(Self {
            shards: (0..shard_amount)
                .map(|_| ConcurrentMap::with_capacity(shard_capacity))
                .collect::<Vec<_>>(),
            partitioner,
        })
    }

    pub fn load<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
        V: Clone,
    {
        self.shard(key).load(key)
    }

    pub fn store(&self, key: K, value: V) {
        self.shard(&key).store(key, value)
    }

    /// See [`ConcurrentMap::load_or_store`].
    pub fn load_or_store(&self, key: K, value: V) -> (V, bool)
    where
        V: Clone,
    {
        self.shard(&key).load_or_store(key, value)
    }

    pub fn delete<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.shard(key).delete(key)
    }

    pub fn load_and_delete<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.shard(key).load_and_delete(key)
    }

    /// Runs `func` on the entry for `key` under that key's shard lock.
    ///
    /// # Arguments
    ///
    /// * `key` - The key to update, insert or remove.
    /// * `func` - Receives the current value, if any, and returns an [`UpdateAction`] plus a result.
    ///   [`UpdateAction::Remove`] deletes the key.
    ///
    /// # Returns
    ///
    /// The result returned by the provided function.
    pub fn update<F, R>(&self, key: K, func: F) -> R
    where
        F: FnOnce(Option<&mut V>) -> (UpdateAction<V>, R),
    {
        self.shard(&key).update(key, func)
    }

    /// Concatenates each shard's keys. Each shard is read under its own lock.
    pub fn keys(&self) -> Vec<K>
    where
        K: Clone,
    {
        let mut keys = Vec::with_capacity(self.len());
        for shard in &self.shards {
            keys.extend(shard.keys());
        }
        keys
    }

    /// Calls `f` for each entry, shard by shard in index order, until it returns `false`.
    ///
    /// Only the shard currently being visited is locked.
    pub fn range<F>(&self, mut f: F)
    where
        F: FnMut(&K, &V) -> bool,
    {
        for shard in &self.shards {
            if !shard.range_until(&mut f) {
                return;
            }
        }
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

    /// Returns the index of the shard that owns `key`.
    pub fn shard_of<Q>(&self, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.partitioner.shard(key)
    }

    /// Read-only access to the shards, e.g. to inspect balance.
    pub fn shards(&self) -> &[ConcurrentMap<K, V>] {
        &self.shards
    }

    #[inline(always)]
    fn shard<Q>(&self, key: &Q) -> &ConcurrentMap<K, V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        &self.shards[self.partitioner.shard(key)]
    }
}
