//! Errors raised while starting or running the sync loop.

use std::io;
use std::time::Duration;

use camino::Utf8PathBuf;
use fleetsync_core::FeedError;
use fleetsync_data::CacheError;
use thiserror::Error;

use crate::checkpoint::CheckpointError;
use crate::config::BackoffPolicy;
use crate::entity::TrackingError;
use crate::sink::SinkError;

/// Failures that prevent the loop from starting.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StartupError {
    /// The source refused the configured credentials or could not be reached.
    #[error("authentication failed: {0}")]
    Authenticate(#[source] FeedError),
    /// The reference cache could not be filled.
    #[error("failed to warm reference cache: {0}")]
    Cache(#[from] CacheError),
    /// A diagnostic of interest cannot be tracked.
    #[error(transparent)]
    Tracking(#[from] TrackingError),
    /// An output or checkpoint directory could not be created.
    #[error("failed to prepare directory {path}: {source}")]
    Directory {
        /// Directory involved.
        path: Utf8PathBuf,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
    /// Persisted tokens could not be read.
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

/// Failures of a single iteration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum IterationError {
    /// A primary feed or a lookup failed; no token moved.
    #[error("feed request failed: {0}")]
    Feed(#[from] FeedError),
    /// The reference cache could not be refreshed; no token moved.
    #[error(transparent)]
    Cache(#[from] CacheError),
    /// Records were refused by their device.
    #[error("{count} record(s) refused, first: {first}")]
    Tracking {
        /// Number of refused records.
        count: usize,
        /// First refusal.
        #[source]
        first: TrackingError,
    },
    /// Output files could not be written; buffers were kept.
    #[error(transparent)]
    Flush(#[from] SinkError),
    /// Tokens could not be persisted.
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

impl IterationError {
    /// Extra pause before the next attempt, or `None` when the normal pacing
    /// applies.
    #[must_use]
    pub const fn backoff(&self, policy: &BackoffPolicy) -> Option<Duration> {
        match self {
            Self::Feed(err) => Some(feed_backoff(err, policy)),
            Self::Cache(err) => match err.feed_error() {
                Some(feed) => Some(feed_backoff(feed, policy)),
                None => None,
            },
            Self::Flush(_) | Self::Checkpoint(_) => Some(policy.io),
            Self::Tracking { .. } => None,
        }
    }
}

const fn feed_backoff(err: &FeedError, policy: &BackoffPolicy) -> Duration {
    if err.is_unavailable() {
        policy.unavailable
    } else {
        policy.transport
    }
}
