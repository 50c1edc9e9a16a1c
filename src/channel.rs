//! Keyed fan-in/fan-out over a group of independent queues.
//!
//! Producers call [`ShardedChannelGroup::push`]; the key function picks one
//! queue per value. [`ShardedChannelGroup::pull`] runs one worker thread per
//! queue, so values with different keys are processed in parallel while values
//! sharing a key keep their FIFO order.

use crate::{CancellationToken, ChannelOptions, ChannelStats, Error, Partitioner, Result};
use crossbeam_channel::{select, Receiver, Sender};
use parking_lot::RwLock;

/// Extracts the routing key of a value.
pub type ShardKey<T> = Box<dyn Fn(&T) -> String + Send + Sync>;

/// One queue of the group.
struct Queue<T> {
    /// `None` once the group is closed. Dropping the last sender disconnects
    /// the channel, after which workers drain what is buffered and stop.
    sender: RwLock<Option<Sender<T>>>,
    receiver: Receiver<T>,
}

impl<T> Queue<T> {
    fn new(capacity: Option<usize>) -> Self {
        let (sender, receiver) = match capacity {
            Some(capacity) => crossbeam_channel::bounded(capacity),
            None => crossbeam_channel::unbounded(),
        };
        Self {
            sender: RwLock::new(Some(sender)),
            receiver,
        }
    }
}

/// Why a pull worker stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    Declined,
    Drained,
    Cancelled,
}

/// A group of `N` queues, partitioned by key on push and drained by one
/// worker per queue on pull.
///
/// # Examples
/// ```
/// use shardsafe::{CancellationToken, ShardedChannelGroup};
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// let group = ShardedChannelGroup::new(|v: &u32| v.to_string());
/// for i in 0..10 {
///     group.push(i).unwrap();
/// }
/// group.close();
///
/// let seen = AtomicUsize::new(0);
/// group
///     .pull(&CancellationToken::new(), |_| {
///         seen.fetch_add(1, Ordering::Relaxed);
///         true
///     })
///     .unwrap();
/// assert_eq!(seen.load(Ordering::Relaxed), 10);
/// ```
pub struct ShardedChannelGroup<T> {
    queues: Vec<Queue<T>>,
    key: ShardKey<T>,
    partitioner: Partitioner,
    stats: ChannelStats,
}

impl<T> ShardedChannelGroup<T> {
    /// Creates a group with one unbounded queue per available CPU.
    pub fn new<F>(key: F) -> Self
    where
        F: Fn(&T) -> String + Send + Sync + 'static,
    {
        Self::build(key, Partitioner::default(), None)
    }

    /// Creates a group with one queue per available CPU, each holding at most
    /// `capacity` values.
    pub fn with_capacity<F>(key: F, capacity: usize) -> Self
    where
        F: Fn(&T) -> String + Send + Sync + 'static,
    {
        Self::build(key, Partitioner::default(), Some(capacity))
    }

    /// Creates a group with `shard_amount` queues of `capacity` values each.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] if `shard_amount` is zero.
    pub fn with_shard_amount_and_capacity<F>(
        key: F,
        shard_amount: usize,
        capacity: usize,
    ) -> Result<Self>
    where
        F: Fn(&T) -> String + Send + Sync + 'static,
    {
        Self::with_options(
            key,
            ChannelOptions {
                shard_amount,
                capacity: Some(capacity),
            },
        )
    }

    /// Creates a group from explicit options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] if `options.shard_amount` is zero.
    pub fn with_options<F>(key: F, options: ChannelOptions) -> Result<Self>
    where
        F: Fn(&T) -> String + Send + Sync + 'static,
    {
        let partitioner = Partitioner::new(options.shard_amount)?;
        Ok(Self::build(key, partitioner, options.capacity))
    }

    fn build<F>(key: F, partitioner: Partitioner, capacity: Option<usize>) -> Self
    where
        F: Fn(&T) -> String + Send + Sync + 'static,
    {
        let shard_amount = partitioner.shard_amount();
        tracing::debug!(
            target: "shardsafe",
            "Creating channel group with {} shards (capacity: {:?})",
            shard_amount,
            capacity
        );
        Self {
            queues: (0..shard_amount).map(|_| Queue::new(capacity)).collect(),
            key: Box::new(key),
            partitioner,
            stats: ChannelStats::new(shard_amount),
        }
    }

    /// Enqueues `value` on the queue selected by its key.
    ///
    /// Blocks while that queue is bounded and full. There is no timeout and no
    /// cancellation; the caller waits until a worker makes room.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UseAfterClose`] if the group was closed. This is a
    /// programming error; the value is dropped.
    pub fn push(&self, value: T) -> Result<()> {
        let shard = self.partitioner.shard((self.key)(&value).as_str());
        // Clone so a blocked send does not hold the lock `close` needs.
        let sender = self.queues[shard].sender.read().clone();
        let Some(sender) = sender else {
            tracing::error!(target: "shardsafe", "Push to shard {} after close", shard);
            return Err(Error::UseAfterClose { shard });
        };
        sender
            .send(value)
            .map_err(|_| Error::UseAfterClose { shard })?;
        self.stats.pushes().add_hit(shard);
        Ok(())
    }

    /// Drains every queue with one worker thread per shard, calling `f` for each value.
    ///
    /// A worker stops when `f` returns `false`, when its queue is closed and
    /// empty, or when `token` is cancelled; the other workers keep going. This
    /// call blocks until all workers have stopped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] with the token's cause if it was cancelled
    /// through [`CancellationToken::cancel_with`]. A plain
    /// [`CancellationToken::cancel`] is a clean stop and yields `Ok(())`.
    pub fn pull<F>(&self, token: &CancellationToken, f: F) -> Result<()>
    where
        T: Send,
        F: Fn(T) -> bool + Sync,
    {
        let f = &f;
        let results = std::thread::scope(|s| {
            let workers = self
                .queues
                .iter()
                .enumerate()
                .map(|(shard, queue)| {
                    s.spawn(move || self.drain(shard, &queue.receiver, token, f))
                })
                .collect::<Vec<_>>();
            workers
                .into_iter()
                .map(|w| w.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
                .collect::<Vec<_>>()
        });
        results.into_iter().collect()
    }

    fn drain<F>(
        &self,
        shard: usize,
        receiver: &Receiver<T>,
        token: &CancellationToken,
        f: &F,
    ) -> Result<()>
    where
        F: Fn(T) -> bool,
    {
        let stop = loop {
            select! {
                recv(receiver) -> value => match value {
                    Ok(value) => {
                        self.stats.pulls().add_hit(shard);
                        if !f(value) {
                            break Stop::Declined;
                        }
                    }
                    Err(_) => break Stop::Drained,
                },
                recv(token.signal()) -> _ => break Stop::Cancelled,
            }
        };
        tracing::debug!(
            target: "shardsafe",
            "Pull worker for shard {} stopped: {:?}",
            shard,
            stop
        );

        match (stop, token.cause()) {
            (Stop::Cancelled, Some(cause)) => Err(Error::Cancelled(cause)),
            _ => Ok(()),
        }
    }

    /// Closes every queue. Values already buffered are still delivered to
    /// workers; later pushes fail with [`Error::UseAfterClose`].
    ///
    /// Calling it again has no effect.
    pub fn close(&self) {
        let mut closed = 0;
        for queue in &self.queues {
            if queue.sender.write().take().is_some() {
                closed += 1;
            }
        }
        if closed > 0 {
            tracing::debug!(target: "shardsafe", "Closed {} channel group queues", closed);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.queues.iter().all(|q| q.sender.read().is_none())
    }

    /// Live push and pull counters.
    pub fn stats(&self) -> &ChannelStats {
        &self.stats
    }

    pub fn shard_amount(&self) -> usize {
        self.queues.len()
    }

    /// Number of values buffered across all queues. Not atomic across shards.
    pub fn pending(&self) -> usize {
        self.queues.iter().map(|q| q.receiver.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConcurrentSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn by_value(v: &u32) -> String {
        v.to_string()
    }

    #[test]
    fn test_constant_key_hits_one_shard() {
        let group = ShardedChannelGroup::with_options(
            |_: &u32| "same".to_string(),
            ChannelOptions {
                shard_amount: 8,
                capacity: None,
            },
        )
        .unwrap();
        for i in 0..100 {
            group.push(i).unwrap();
        }

        let target = crate::shard("same", 8);
        let pushes = group.stats().pushes();
        assert_eq!(pushes.hits(target), 100);
        for shard in (0..8).filter(|s| *s != target) {
            assert_eq!(pushes.hits(shard), 0);
        }
        assert_eq!(group.pending(), 100);
    }

    #[test]
    fn test_no_data_loss_on_close() {
        let group = ShardedChannelGroup::with_options(
            by_value,
            ChannelOptions {
                shard_amount: 4,
                capacity: None,
            },
        )
        .unwrap();
        const K: u32 = 1000;
        for i in 0..K {
            group.push(i).unwrap();
        }
        group.close();
        assert!(group.is_closed());

        let seen = ConcurrentSet::new();
        group
            .pull(&CancellationToken::new(), |v| {
                assert!(seen.add(v));
                true
            })
            .unwrap();

        assert_eq!(seen.len(), K as usize);
        assert_eq!(group.stats().pulls().total_hits(), K as u64);
        assert_eq!(
            group.stats().pulls().snapshot(),
            group.stats().pushes().snapshot()
        );
        assert_eq!(group.pending(), 0);
    }

    #[test]
    fn test_pull_started_before_close_drains_everything() {
        let group = Arc::new(
            ShardedChannelGroup::with_shard_amount_and_capacity(by_value, 4, 8).unwrap(),
        );
        let seen = Arc::new(AtomicUsize::new(0));

        let puller = {
            let group = group.clone();
            let seen = seen.clone();
            std::thread::spawn(move || {
                group.pull(&CancellationToken::new(), |_| {
                    seen.fetch_add(1, Ordering::AcqRel);
                    true
                })
            })
        };

        for i in 0..500 {
            group.push(i).unwrap();
        }
        group.close();

        puller.join().unwrap().unwrap();
        assert_eq!(seen.load(Ordering::Acquire), 500);
    }

    #[test]
    fn test_fifo_within_shard() {
        let group = ShardedChannelGroup::with_options(
            |v: &(u32, u32)| v.0.to_string(),
            ChannelOptions {
                shard_amount: 4,
                capacity: None,
            },
        )
        .unwrap();
        for seq in 0..100 {
            for key in 0..8 {
                group.push((key, seq)).unwrap();
            }
        }
        group.close();

        let last = (0..8).map(|_| AtomicUsize::new(0)).collect::<Vec<_>>();
        group
            .pull(&CancellationToken::new(), |(key, seq)| {
                let prev = last[key as usize].swap(seq as usize + 1, Ordering::AcqRel);
                assert_eq!(prev, seq as usize);
                true
            })
            .unwrap();
    }

    #[test]
    fn test_declining_stops_only_that_worker() {
        let group = ShardedChannelGroup::with_options(
            by_value,
            ChannelOptions {
                shard_amount: 4,
                capacity: None,
            },
        )
        .unwrap();
        for i in 0..100 {
            group.push(i).unwrap();
        }
        group.close();

        group.pull(&CancellationToken::new(), |_| false).unwrap();

        // Each worker with a non-empty queue takes exactly one value.
        let pushes = group.stats().pushes().snapshot();
        let pulls = group.stats().pulls().snapshot();
        for (pushed, pulled) in pushes.iter().zip(pulls.iter()) {
            assert_eq!(*pulled, u64::from(*pushed > 0));
        }
        assert_eq!(group.pending() as u64, 100 - group.stats().pulls().total_hits());
    }

    #[test]
    fn test_cancel_with_cause_is_returned() {
        let group = ShardedChannelGroup::with_shard_amount_and_capacity(by_value, 3, 4).unwrap();
        let token = CancellationToken::new();
        token.cancel_with("shutdown");

        match group.pull(&token, |_| true) {
            Err(Error::Cancelled(cause)) => assert_eq!(cause.to_string(), "shutdown"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_cancel_wakes_blocked_workers() {
        let group = Arc::new(
            ShardedChannelGroup::with_shard_amount_and_capacity(by_value, 4, 1).unwrap(),
        );
        let token = CancellationToken::new();

        let puller = {
            let group = group.clone();
            let token = token.clone();
            std::thread::spawn(move || group.pull(&token, |_| true))
        };

        std::thread::sleep(Duration::from_millis(20));
        token.cancel_with("stop");
        assert!(matches!(puller.join().unwrap(), Err(Error::Cancelled(_))));

        let token = CancellationToken::new();
        let puller = {
            let group = group.clone();
            let token = token.clone();
            std::thread::spawn(move || group.pull(&token, |_| true))
        };
        token.cancel();
        assert!(puller.join().unwrap().is_ok());
    }

    #[test]
    fn test_push_blocks_when_full() {
        let group = Arc::new(
            ShardedChannelGroup::with_shard_amount_and_capacity(by_value, 1, 1).unwrap(),
        );
        group.push(1).unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let pusher = {
            let group = group.clone();
            let done = done.clone();
            std::thread::spawn(move || {
                group.push(2).unwrap();
                done.store(true, Ordering::Release);
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        assert!(!done.load(Ordering::Acquire));

        // Take one value; the single worker then stops.
        group
            .pull(&CancellationToken::new(), |v| {
                assert_eq!(v, 1);
                false
            })
            .unwrap();

        pusher.join().unwrap();
        assert!(done.load(Ordering::Acquire));
        assert_eq!(group.pending(), 1);
    }

    #[test]
    fn test_push_after_close_fails() {
        let group = ShardedChannelGroup::with_capacity(by_value, 2);
        group.close();
        group.close();
        assert!(matches!(group.push(7), Err(Error::UseAfterClose { .. })));
        assert_eq!(group.stats().pushes().total_hits(), 0);
    }

    #[test]
    fn test_rejects_zero_shards() {
        assert!(matches!(
            ShardedChannelGroup::with_shard_amount_and_capacity(by_value, 0, 1),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_default_shard_amount() {
        let group = ShardedChannelGroup::new(by_value);
        assert_eq!(group.shard_amount(), crate::default_shard_amount());
        assert_eq!(group.stats().pushes().len(), group.shard_amount());
        assert!(!group.is_closed());
    }
}
