//! Tracking, file output and the sync loop for fleetsync.
//!
//! Responsibilities:
//! - Decide which devices are tracked and buffer their hydrated records.
//! - Write buffered records to size-bounded, pipe-delimited files.
//! - Persist primary feed tokens and drive the iteration loop.
//!
//! Boundaries:
//! - Remote calls, caching and hydration live in `fleetsync-data`.
//! - No argument parsing or logger setup (lives in `fleetsync-cli`).
//!
//! Invariants:
//! - Each output file has exactly one writer: the entity owning its sink.
//! - Tokens are persisted only after their records reached a device buffer.

#![forbid(unsafe_code)]

pub mod checkpoint;
pub mod config;
pub mod entity;
pub mod format;
pub mod registry;
pub mod sink;
pub mod worker;

pub use checkpoint::{CheckpointError, CheckpointStore, FeedTokens};
pub use config::{
    BackoffPolicy, DEFAULT_MAX_FILE_BYTES, DEFAULT_PACING, FeedStartMode, MIN_PACING, SyncConfig,
    TrackingPolicy, megabytes_to_bytes,
};
pub use entity::{TrackedDiagnostic, TrackedEntity, TrackingError};
pub use format::{DeviceIdentity, OutputCategory};
pub use registry::{DistributionSummary, PendingDevices, TrackingRegistry};
pub use sink::{RotatingFileSink, SinkError};
pub use worker::{IterationError, IterationStats, LoopState, StartupError, SyncLoop};
