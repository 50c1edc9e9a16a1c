use std::sync::Arc;
use thiserror::Error;

/// The reason a [`CancellationToken`](crate::CancellationToken) was cancelled.
pub type CancelCause = Arc<dyn std::error::Error + Send + Sync>;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Pull cancelled: {0}")]
    Cancelled(CancelCause),

    #[error("Push to shard {shard} after the channel group was closed")]
    UseAfterClose { shard: usize },
}
