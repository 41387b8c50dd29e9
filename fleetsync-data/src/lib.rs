//! Feed synchronization, reference caching and hydration for fleetsync.
//!
//! Responsibilities:
//! - Drain paginated change feeds through a [`fleetsync_core::FeedSource`].
//! - Maintain lookup caches and resolve record references against them.
//! - Provide the JSON-RPC HTTP adapter for the upstream service.
//!
//! Boundaries:
//! - No file output or tracking policy (lives in `fleetsync-tracking`).
//! - Remote calls only go through `FeedSource`.
//!
//! Invariants:
//! - A feed token only advances together with the records it covers.
//! - Controller and unit-of-measure caches are populated before any
//!   diagnostic is cached.

#![forbid(unsafe_code)]

pub mod cache;
pub mod feed;
pub mod http;
pub mod hydrate;
pub mod store;

pub use cache::{CacheError, FEEDLESS_REFRESH_INTERVAL, ReferenceCache, RefreshSummary};
pub use feed::{FeedBatch, FeedSynchronizer};
pub use http::{HttpFeedSource, Login};
pub use hydrate::{HydratedBatch, HydrationPipeline, RawBatch};
pub use store::{KeyedStore, MergeSummary};
