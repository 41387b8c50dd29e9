//! Core domain types for the fleetsync telemetry engine.
//!
//! The model mirrors what the upstream fleet-tracking service returns:
//! identifier-only references inside raw feed records, fully populated
//! lookup entities, and the hydrated records produced once references are
//! resolved. The [`FeedSource`] trait is the seam through which every remote
//! call flows.

#![forbid(unsafe_code)]

pub mod diagnostic;
pub mod entities;
pub mod feed;
pub mod ids;
pub mod records;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use diagnostic::{DiagnosticCategory, DiagnosticType, UnsupportedDiagnosticType};
pub use entities::{
    CachedDiagnostic, Controller, Device, Diagnostic, FailureMode, Keyed, Source, UnitOfMeasure,
    User,
};
pub use feed::{
    DEVICE_RESULTS_LIMIT, FEED_RESULTS_LIMIT, FeedError, FeedKind, FeedPage, FeedRecord,
    FeedSource, FeedStart, FeedToken, ParseFeedTokenError,
};
pub use ids::{EntityId, EntityRef, Resolved};
pub use records::{
    FaultData, FaultRecord, GpsRecord, LogRecord, StatusData, StatusRecord, Timestamped,
};
