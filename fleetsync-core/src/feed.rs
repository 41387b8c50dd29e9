//! Change feeds and the remote capability that serves them.
//!
//! A feed is a paginated, token-ordered change stream for one entity type.
//! Each call returns the records changed since a [`FeedToken`] plus the token
//! to resume from. [`FeedSource`] is the only way the engine talks to the
//! upstream service.

use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::entities::{Controller, Device, Diagnostic, FailureMode, UnitOfMeasure};
use crate::ids::EntityId;
use crate::records::{FaultData, LogRecord, StatusData};

/// Result ceiling for the device and user feeds.
pub const DEVICE_RESULTS_LIMIT: usize = 5_000;
/// Result ceiling for every other feed.
pub const FEED_RESULTS_LIMIT: usize = 50_000;

/// Continuation token for one feed. Zero means "from the beginning".
///
/// # Examples
///
/// ```
/// use fleetsync_core::FeedToken;
///
/// let token: FeedToken = " 42\n".parse().expect("decimal token");
/// assert_eq!(token, FeedToken::new(42));
/// assert_eq!(token.to_string(), "42");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FeedToken(u64);

impl FeedToken {
    /// The token a feed starts from when nothing has been read yet.
    pub const ZERO: Self = Self(0);

    /// Wrap a raw version number.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw version number.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Whether the token points at the start of the feed.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for FeedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Raised when token text is not a decimal number.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid feed token {text:?}: {source}")]
pub struct ParseFeedTokenError {
    /// The rejected text.
    pub text: String,
    /// Underlying parse failure.
    #[source]
    pub source: ParseIntError,
}

impl FromStr for FeedToken {
    type Err = ParseFeedTokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|source| ParseFeedTokenError {
                text: s.to_owned(),
                source,
            })
    }
}

/// The entity types served through feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedKind {
    /// Position reports.
    LogRecord,
    /// Status readings.
    StatusData,
    /// Fault events.
    FaultData,
    /// Devices.
    Device,
    /// Diagnostics.
    Diagnostic,
}

impl FeedKind {
    /// Upstream type name.
    #[must_use]
    pub const fn type_name(self) -> &'static str {
        match self {
            Self::LogRecord => "LogRecord",
            Self::StatusData => "StatusData",
            Self::FaultData => "FaultData",
            Self::Device => "Device",
            Self::Diagnostic => "Diagnostic",
        }
    }

    /// Maximum number of records one page may hold.
    #[must_use]
    pub const fn results_limit(self) -> usize {
        match self {
            Self::Device => DEVICE_RESULTS_LIMIT,
            Self::LogRecord | Self::StatusData | Self::FaultData | Self::Diagnostic => {
                FEED_RESULTS_LIMIT
            }
        }
    }
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Where a feed call starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStart {
    /// Resume after the given token.
    Token(FeedToken),
    /// Start from records at or after the given time.
    Since(DateTime<Utc>),
}

/// One page returned by a feed call.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedPage<T> {
    /// Records in delivery order.
    pub records: Vec<T>,
    /// Token to resume from.
    pub to_version: FeedToken,
}

impl<T> FeedPage<T> {
    /// Build a page.
    #[must_use]
    pub const fn new(records: Vec<T>, to_version: FeedToken) -> Self {
        Self {
            records,
            to_version,
        }
    }
}

/// Failures raised by a [`FeedSource`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum FeedError {
    /// The request did not reach the service or the connection dropped.
    #[error("network error during {method}: {message}")]
    Transport {
        /// Remote method being called.
        method: &'static str,
        /// Transport failure description.
        message: String,
    },
    /// The service is up but its database is temporarily unavailable.
    #[error("upstream unavailable during {method}: {message}")]
    Unavailable {
        /// Remote method being called.
        method: &'static str,
        /// Service-supplied message.
        message: String,
    },
    /// The service rejected the call.
    #[error("{method} rejected with {name}: {message}")]
    Rejected {
        /// Remote method being called.
        method: &'static str,
        /// Service-supplied error name.
        name: String,
        /// Service-supplied message.
        message: String,
    },
    /// The response could not be decoded.
    #[error("failed to decode {method} response: {message}")]
    Decode {
        /// Remote method being called.
        method: &'static str,
        /// Decoder failure description.
        message: String,
    },
    /// A call was attempted before authentication.
    #[error("{method} called before authentication")]
    NotAuthenticated {
        /// Remote method being called.
        method: &'static str,
    },
}

impl FeedError {
    /// Whether the failure is the service's transient-unavailable signal.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Remote capability serving feeds, full listings and point lookups.
#[async_trait(?Send)]
pub trait FeedSource {
    /// Establish a session. Must complete before any other call.
    async fn authenticate(&self) -> Result<(), FeedError>;

    /// Read one page of position reports.
    async fn log_records(
        &self,
        start: FeedStart,
        limit: usize,
    ) -> Result<FeedPage<LogRecord>, FeedError>;

    /// Read one page of status readings.
    async fn status_data(
        &self,
        start: FeedStart,
        limit: usize,
    ) -> Result<FeedPage<StatusData>, FeedError>;

    /// Read one page of fault events.
    async fn fault_data(
        &self,
        start: FeedStart,
        limit: usize,
    ) -> Result<FeedPage<FaultData>, FeedError>;

    /// Read one page of device changes.
    async fn devices(&self, start: FeedStart, limit: usize)
    -> Result<FeedPage<Device>, FeedError>;

    /// Read one page of diagnostic changes.
    async fn diagnostics(
        &self,
        start: FeedStart,
        limit: usize,
    ) -> Result<FeedPage<Diagnostic>, FeedError>;

    /// List every controller.
    async fn controllers(&self) -> Result<Vec<Controller>, FeedError>;

    /// List every failure mode.
    async fn failure_modes(&self) -> Result<Vec<FailureMode>, FeedError>;

    /// List every unit of measure.
    async fn units_of_measure(&self) -> Result<Vec<UnitOfMeasure>, FeedError>;

    /// Look up one controller.
    async fn controller(&self, id: &EntityId) -> Result<Option<Controller>, FeedError>;

    /// Look up one failure mode.
    async fn failure_mode(&self, id: &EntityId) -> Result<Option<FailureMode>, FeedError>;
}

/// Record types that arrive through a feed.
#[async_trait(?Send)]
pub trait FeedRecord: Sized {
    /// Feed carrying this type.
    const KIND: FeedKind;

    /// Read one page of this type from `source`.
    async fn fetch<S>(source: &S, start: FeedStart, limit: usize)
    -> Result<FeedPage<Self>, FeedError>
    where
        S: FeedSource + ?Sized;
}

macro_rules! feed_record {
    ($ty:ty, $kind:expr, $method:ident) => {
        #[async_trait(?Send)]
        impl FeedRecord for $ty {
            const KIND: FeedKind = $kind;

            async fn fetch<S>(
                source: &S,
                start: FeedStart,
                limit: usize,
            ) -> Result<FeedPage<Self>, FeedError>
            where
                S: FeedSource + ?Sized,
            {
                source.$method(start, limit).await
            }
        }
    };
}

feed_record!(LogRecord, FeedKind::LogRecord, log_records);
feed_record!(StatusData, FeedKind::StatusData, status_data);
feed_record!(FaultData, FeedKind::FaultData, fault_data);
feed_record!(Device, FeedKind::Device, devices);
feed_record!(Diagnostic, FeedKind::Diagnostic, diagnostics);
