//! Facade crate for the fleetsync telemetry sync engine.
//!
//! This crate re-exports the domain types, the feed and cache machinery, and
//! the tracking loop so embedders can depend on a single crate.

#![forbid(unsafe_code)]

pub use fleetsync_core::{
    CachedDiagnostic, Device, Diagnostic, EntityId, EntityRef, FaultRecord, FeedError, FeedKind,
    FeedPage, FeedSource, FeedStart, FeedToken, GpsRecord, Resolved, StatusRecord,
};

pub use fleetsync_data::{
    CacheError, FeedBatch, FeedSynchronizer, HttpFeedSource, HydratedBatch, HydrationPipeline,
    Login, RawBatch, ReferenceCache,
};

pub use fleetsync_tracking::{
    BackoffPolicy, CheckpointStore, FeedStartMode, IterationError, StartupError, SyncConfig,
    SyncLoop, TrackingPolicy, TrackingRegistry,
};

#[cfg(feature = "test-support")]
pub use fleetsync_core::test_support;
