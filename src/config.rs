use std::sync::OnceLock;

/// Returns the default number of shards: the host's available parallelism.
pub fn default_shard_amount() -> usize {
    static DEFAULT_SHARD_AMOUNT: OnceLock<usize> = OnceLock::new();
    *DEFAULT_SHARD_AMOUNT
        .get_or_init(|| std::thread::available_parallelism().map_or(1, usize::from))
}

/// Construction options for a [`ShardedChannelGroup`](crate::ShardedChannelGroup).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelOptions {
    /// Number of independent queues.
    /// Must be greater than zero.
    /// Default: host parallelism.
    pub shard_amount: usize,

    /// Capacity of each queue. `None` means unbounded, `Some(0)` means every
    /// push waits for a worker to take the value.
    /// Default: `None`.
    pub capacity: Option<usize>,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            shard_amount: default_shard_amount(),
            capacity: None,
        }
    }
}
