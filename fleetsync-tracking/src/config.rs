//! Typed configuration consumed by the sync loop.

use std::collections::BTreeSet;
use std::time::Duration;

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use fleetsync_core::EntityId;
use fleetsync_data::FEEDLESS_REFRESH_INTERVAL;

/// Shortest pause allowed between iterations.
pub const MIN_PACING: Duration = Duration::from_secs(1);
/// Default pause between iterations.
pub const DEFAULT_PACING: Duration = Duration::from_secs(60);
/// Default size at which output files rotate.
pub const DEFAULT_MAX_FILE_BYTES: u64 = 1_024_000;
/// Bytes per configured "megabyte" of file size.
pub const BYTES_PER_MEGABYTE: u64 = 1_024_000;

/// Which devices become tracked.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TrackingPolicy {
    /// Track every device that reports data.
    #[default]
    Reporting,
    /// Track only the listed devices.
    AllowList(BTreeSet<EntityId>),
}

impl TrackingPolicy {
    /// Whether records for `device` should be tracked.
    #[must_use]
    pub fn admits(&self, device: &EntityId) -> bool {
        match self {
            Self::Reporting => true,
            Self::AllowList(ids) => ids.contains(device),
        }
    }
}

/// Where the primary feeds start reading on a fresh run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedStartMode {
    /// Start from the moment the run begins.
    #[default]
    Now,
    /// Start from a given time.
    SpecificTime(DateTime<Utc>),
    /// Resume from persisted checkpoints.
    Resume,
}

impl FeedStartMode {
    /// Time the first call of each primary feed should start from, or `None`
    /// when resuming from tokens. Times in the future are clamped to `now`.
    #[must_use]
    pub fn start_time(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Now => Some(now),
            Self::SpecificTime(time) => Some(time.min(now)),
            Self::Resume => None,
        }
    }
}

/// Pauses applied after a failed iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// After transport, rejection or decoding failures.
    pub transport: Duration,
    /// After the upstream reports itself unavailable.
    pub unavailable: Duration,
    /// After a local I/O failure.
    pub io: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            transport: Duration::from_secs(5),
            unavailable: Duration::from_secs(5 * 60),
            io: Duration::from_secs(60),
        }
    }
}

/// Everything the sync loop needs to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Which devices become tracked.
    pub tracking: TrackingPolicy,
    /// Diagnostics whose status or fault data is written out.
    pub diagnostics: Vec<EntityId>,
    /// Where the primary feeds start.
    pub feed_start: FeedStartMode,
    /// Requested pause between iterations; see [`SyncConfig::pacing`].
    pub pacing: Duration,
    /// Size at which output files rotate.
    pub max_file_bytes: u64,
    /// Directory receiving output files.
    pub output_dir: Utf8PathBuf,
    /// Directory holding checkpoint files.
    pub checkpoint_dir: Utf8PathBuf,
    /// Keep iterating until stopped, or run a single iteration.
    pub continuous: bool,
    /// Pauses applied after failures.
    pub backoff: BackoffPolicy,
    /// How long feedless lookup tables are trusted.
    pub cache_refresh_interval: Duration,
}

impl SyncConfig {
    /// Defaults writing output and checkpoints into `output_dir`.
    #[must_use]
    pub fn new(output_dir: Utf8PathBuf) -> Self {
        Self {
            tracking: TrackingPolicy::default(),
            diagnostics: Vec::new(),
            feed_start: FeedStartMode::default(),
            pacing: DEFAULT_PACING,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            checkpoint_dir: output_dir.clone(),
            output_dir,
            continuous: true,
            backoff: BackoffPolicy::default(),
            cache_refresh_interval: FEEDLESS_REFRESH_INTERVAL,
        }
    }

    /// Pause between iterations, never shorter than [`MIN_PACING`].
    #[must_use]
    pub fn pacing(&self) -> Duration {
        self.pacing.max(MIN_PACING)
    }
}

/// Convert a size given in configuration megabytes into bytes.
#[must_use]
pub const fn megabytes_to_bytes(megabytes: u64) -> u64 {
    megabytes.saturating_mul(BYTES_PER_MEGABYTE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    #[rstest]
    #[case(Duration::ZERO, MIN_PACING)]
    #[case(Duration::from_millis(400), MIN_PACING)]
    #[case(Duration::from_secs(30), Duration::from_secs(30))]
    fn pacing_is_clamped(#[case] requested: Duration, #[case] expected: Duration) {
        let mut config = SyncConfig::new(Utf8PathBuf::from("out"));
        config.pacing = requested;
        assert_eq!(config.pacing(), expected);
    }

    #[rstest]
    fn future_start_time_is_clamped_to_now() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).single();
        let later = Utc.timestamp_opt(1_800_000_000, 0).single();
        let (Some(now_time), Some(later_time)) = (now, later) else {
            panic!("fixed timestamps should be valid");
        };
        assert_eq!(
            FeedStartMode::SpecificTime(later_time).start_time(now_time),
            Some(now_time)
        );
        assert_eq!(FeedStartMode::Resume.start_time(now_time), None);
    }

    #[rstest]
    fn allow_list_admits_only_listed_devices() {
        let policy = TrackingPolicy::AllowList(BTreeSet::from([EntityId::from("b1")]));
        assert!(policy.admits(&EntityId::from("b1")));
        assert!(!policy.admits(&EntityId::from("b2")));
        assert!(TrackingPolicy::Reporting.admits(&EntityId::from("b2")));
    }

    #[rstest]
    fn megabytes_use_the_configured_multiplier() {
        assert_eq!(megabytes_to_bytes(2), 2_048_000);
        assert_eq!(megabytes_to_bytes(u64::MAX), u64::MAX);
    }
}
