use crate::CancelCause;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cloneable handle used to stop [`ShardedChannelGroup::pull`](crate::ShardedChannelGroup::pull).
///
/// All clones share one state. Cancelling drops the internal signal sender, so
/// every pull worker waiting on it wakes up at once.
///
/// # Examples
/// ```
/// use shardsafe::CancellationToken;
///
/// let token = CancellationToken::new();
/// let observer = token.clone();
/// token.cancel_with("shutting down");
/// assert!(observer.is_cancelled());
/// assert_eq!(observer.cause().unwrap().to_string(), "shutting down");
/// ```
#[derive(Debug, Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    cancelled: AtomicBool,
    cause: Mutex<Option<CancelCause>>,
    // Never sends; dropped on cancel to disconnect `signal`.
    guard: Mutex<Option<Sender<()>>>,
    signal: Receiver<()>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        let (guard, signal) = crossbeam_channel::bounded(0);
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                cause: Mutex::new(None),
                guard: Mutex::new(Some(guard)),
                signal,
            }),
        }
    }

    /// Requests a stop without a cause. `pull` then returns `Ok(())`.
    pub fn cancel(&self) {
        self.fire(None);
    }

    /// Requests a stop with `cause`. `pull` then returns
    /// [`Error::Cancelled`](crate::Error::Cancelled) carrying it.
    ///
    /// Only the first cancellation counts; later calls are ignored.
    pub fn cancel_with<E>(&self, cause: E)
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let cause: Box<dyn std::error::Error + Send + Sync> = cause.into();
        self.fire(Some(Arc::from(cause)));
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Returns the cause given to [`cancel_with`](Self::cancel_with), if any.
    pub fn cause(&self) -> Option<CancelCause> {
        self.inner.cause.lock().clone()
    }

    /// A receiver that becomes ready (disconnected) once the token is cancelled.
    pub(crate) fn signal(&self) -> &Receiver<()> {
        &self.inner.signal
    }

    fn fire(&self, cause: Option<CancelCause>) {
        let mut guard = self.inner.guard.lock();
        if guard.is_none() {
            return;
        }
        // Cause before flag, so anyone who sees the flag also sees the cause.
        *self.inner.cause.lock() = cause;
        self.inner.cancelled.store(true, Ordering::Release);
        guard.take();
    }
}
