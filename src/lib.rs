//! Thread-safe maps, sets and channel groups that partition their data across
//! independently locked shards.
//!
//! # Overview
//! Every key is hashed to one of `N` shards, and each shard has its own lock or
//! queue. Operations on different shards never contend, so up to `N` writers
//! make progress at once. `N` is fixed at construction and defaults to the
//! host's available parallelism.
//!
//! # Features
//! - [`ConcurrentMap`] / [`ShardedMap`]: `load`, `store`, `load_or_store`,
//!   `delete`, `load_and_delete` and atomic `update` per key
//! - [`ConcurrentSet`] / [`ShardedSet`]: uniqueness sets with the same layout
//! - [`ShardedChannelGroup`]: keyed queues with backpressure, drained by one
//!   worker per shard, stoppable through a [`CancellationToken`]
//! - [`ShardStats`]: per-shard counters to observe partition balance
//! - No poisoning, the locks are released normally on panic
//!
//! Aggregates (`len`, `keys`, `range`) visit one shard at a time and are
//! snapshots, not atomic across shards.
//!
//! # Examples
//! ```
//! use shardsafe::ShardedMap;
//!
//! let map = ShardedMap::<String, u32>::with_shard_amount(4)?;
//!
//! // Basic operations
//! map.store("key1".into(), 42);
//! assert_eq!(map.load("key1"), Some(42));
//!
//! // Atomic check-then-set
//! assert_eq!(map.load_or_store("key1".into(), 7), (42, true));
//!
//! // Remove a value
//! assert_eq!(map.load_and_delete("key1"), Some(42));
//! assert_eq!(map.load("key1"), None);
//! # Ok::<(), shardsafe::Error>(())
//! ```
mod cancel;
mod channel;
mod config;
mod error;
mod partition;
mod set;
mod shards_map;
mod stats;

pub use cancel::CancellationToken;
pub use channel::{ShardKey, ShardedChannelGroup};
pub use config::{default_shard_amount, ChannelOptions};
pub use error::{CancelCause, Error, Result};
pub use partition::{shard, Partitioner};
pub use set::{ConcurrentSet, ShardedSet};
pub use shards_map::{ConcurrentMap, ShardedMap, UpdateAction};
pub use stats::{ChannelStats, ShardStats};
