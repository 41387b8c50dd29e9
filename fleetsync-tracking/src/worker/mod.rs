//! The iteration loop tying feeds, caches, tracking and checkpoints together.
//!
//! Each iteration pulls the primary feeds concurrently, refreshes the
//! reference cache, hydrates and distributes the records, flushes every
//! tracked device and persists the new tokens. Tokens only move once their
//! records have been handed to the tracked devices; a failed fetch, cache
//! refresh or hydration commits nothing and the next iteration repeats the
//! same requests.

mod error;
mod state;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use fleetsync_core::{
    CachedDiagnostic, EntityId, EntityRef, FaultData, FeedError, FeedRecord, FeedSource,
    FeedStart, FeedToken, LogRecord, StatusData,
};
use fleetsync_data::{FeedBatch, FeedSynchronizer, HydrationPipeline, RawBatch, ReferenceCache};
use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::checkpoint::{CheckpointStore, FeedTokens};
use crate::config::{FeedStartMode, SyncConfig, TrackingPolicy};
use crate::registry::TrackingRegistry;

pub use error::{IterationError, StartupError};
pub use state::{IterationStats, LoopState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FeedCursor {
    token: FeedToken,
    since: Option<DateTime<Utc>>,
}

impl FeedCursor {
    const fn new(token: FeedToken, since: Option<DateTime<Utc>>) -> Self {
        Self { token, since }
    }

    fn start(self) -> FeedStart {
        self.since.map_or(FeedStart::Token(self.token), FeedStart::Since)
    }

    /// A zero token carries no position, so a time-based start survives it.
    const fn commit(&mut self, token: FeedToken) {
        if !token.is_zero() {
            self.token = token;
            self.since = None;
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct FetchedTokens {
    gps: FeedToken,
    status: Option<FeedToken>,
    fault: Option<FeedToken>,
}

/// Drives repeated sync iterations against one [`FeedSource`].
#[derive(Debug)]
pub struct SyncLoop<'a, S: ?Sized> {
    source: &'a S,
    config: SyncConfig,
    cache: ReferenceCache,
    registry: TrackingRegistry,
    checkpoints: CheckpointStore,
    gps: FeedCursor,
    status: FeedCursor,
    fault: FeedCursor,
    fetch_status: bool,
    fetch_fault: bool,
    state: LoopState,
    iterations: u64,
}

impl<'a, S> SyncLoop<'a, S>
where
    S: FeedSource + ?Sized,
{
    /// Authenticate, warm the reference cache and prepare tracking.
    ///
    /// Allow-listed devices and diagnostics of interest that the source does
    /// not know are dropped with a warning. When no allow-listed device
    /// remains, every reporting device is tracked instead.
    ///
    /// # Errors
    ///
    /// Returns a [`StartupError`] when authentication or the first cache
    /// refresh fails, a diagnostic cannot be tracked, a directory cannot be
    /// created or persisted tokens cannot be read.
    pub async fn start(source: &'a S, config: SyncConfig) -> Result<Self, StartupError> {
        source
            .authenticate()
            .await
            .map_err(StartupError::Authenticate)?;
        info!("authenticated with feed source");

        let mut cache = ReferenceCache::with_refresh_interval(config.cache_refresh_interval);
        cache.refresh(source, Instant::now()).await?;
        info!(
            "cached {} devices and {} diagnostics",
            cache.devices().len(),
            cache.diagnostics().len()
        );

        let diagnostics = known_diagnostics(&cache, &config.diagnostics);
        let policy = known_devices(&cache, &config.tracking);
        let mut registry = TrackingRegistry::new(
            policy,
            diagnostics,
            config.output_dir.clone(),
            config.max_file_bytes,
        )?;
        if let TrackingPolicy::AllowList(ids) = registry.policy().clone() {
            for id in ids {
                registry.get_or_create(&cache.resolve_device(&EntityRef::from_id(id)));
            }
        }

        for dir in [&config.output_dir, &config.checkpoint_dir] {
            fleetsync_fs::ensure_dir(dir).map_err(|source| StartupError::Directory {
                path: dir.clone(),
                source,
            })?;
        }

        let checkpoints = CheckpointStore::new(config.checkpoint_dir.clone());
        let now = Utc::now();
        let (tokens, since) = match config.feed_start.start_time(now) {
            Some(time) => {
                if matches!(
                    config.feed_start,
                    FeedStartMode::SpecificTime(requested) if requested > now
                ) {
                    warn!("feed start time lies in the future; starting from {now}");
                }
                info!("starting feeds from {time}");
                (FeedTokens::default(), Some(time))
            }
            None => {
                let tokens = checkpoints.load()?;
                info!(
                    "resuming feeds from tokens gps {}, status {}, fault {}",
                    tokens.gps, tokens.status, tokens.fault
                );
                (tokens, None)
            }
        };

        let fetch_status = registry.needs_status_data();
        let fetch_fault = registry.needs_fault_data();
        debug!("status feed enabled: {fetch_status}, fault feed enabled: {fetch_fault}");

        Ok(Self {
            source,
            config,
            cache,
            registry,
            checkpoints,
            gps: FeedCursor::new(tokens.gps, since),
            status: FeedCursor::new(tokens.status, since),
            fault: FeedCursor::new(tokens.fault, since),
            fetch_status,
            fetch_fault,
            state: LoopState::Idle,
            iterations: 0,
        })
    }

    /// Current phase.
    #[must_use]
    pub const fn state(&self) -> LoopState {
        self.state
    }

    /// Tracked devices.
    #[must_use]
    pub const fn registry(&self) -> &TrackingRegistry {
        &self.registry
    }

    /// Tokens the next iteration continues from.
    #[must_use]
    pub const fn tokens(&self) -> FeedTokens {
        FeedTokens {
            gps: self.gps.token,
            status: self.status.token,
            fault: self.fault.token,
        }
    }

    /// Number of iterations attempted.
    #[must_use]
    pub const fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Run iterations until `cancel` fires, or once when the configuration
    /// asks for a single iteration.
    ///
    /// In continuous mode a failed iteration is logged and followed by the
    /// backoff its error calls for; the loop keeps going.
    ///
    /// # Errors
    ///
    /// Returns the [`IterationError`] of a failed single iteration.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<(), IterationError> {
        loop {
            if cancel.is_cancelled() {
                self.transition(LoopState::Stopped);
                return Ok(());
            }
            let outcome = self.run_iteration().await;
            if !self.config.continuous {
                self.transition(LoopState::Stopped);
                return outcome.map(|_| ());
            }
            let pause = match outcome {
                Ok(_) => self.config.pacing(),
                Err(err) => {
                    let backoff = err.backoff(&self.config.backoff);
                    let pause = backoff.unwrap_or_else(|| self.config.pacing());
                    if backoff.is_some() {
                        warn!("iteration failed, retrying in {}s: {err}", pause.as_secs());
                    } else {
                        error!("iteration failed: {err}");
                    }
                    pause
                }
            };
            self.transition(LoopState::Pacing);
            tokio::select! {
                () = cancel.cancelled() => debug!("stop requested while pacing"),
                () = tokio::time::sleep(pause) => {}
            }
            self.transition(LoopState::Idle);
        }
    }

    /// Run one iteration and return to [`LoopState::Idle`].
    ///
    /// # Errors
    ///
    /// Returns an [`IterationError`]. Feed, cache and hydration failures
    /// leave every token where it was. Write and tracking failures are
    /// reported after the tokens were persisted; unwritten records stay
    /// buffered.
    pub async fn run_iteration(&mut self) -> Result<IterationStats, IterationError> {
        self.iterations = self.iterations.saturating_add(1);
        let outcome = self.iterate().await;
        self.transition(LoopState::Idle);
        if let Ok(stats) = &outcome {
            info!("iteration {}: {stats}", self.iterations);
        }
        outcome
    }

    async fn iterate(&mut self) -> Result<IterationStats, IterationError> {
        self.transition(LoopState::Fetching);
        let sync = FeedSynchronizer::new(self.source);
        let (gps, status, fault) = tokio::try_join!(
            sync.sync_once::<LogRecord>(self.gps.start()),
            drain_if::<StatusData, S>(&sync, self.fetch_status, self.status.start()),
            drain_if::<FaultData, S>(&sync, self.fetch_fault, self.fault.start()),
        )?;
        self.cache.refresh(self.source, Instant::now()).await?;

        self.transition(LoopState::Hydrating);
        let fetched = FetchedTokens {
            gps: gps.to_token,
            status: status.as_ref().map(|batch| batch.to_token),
            fault: fault.as_ref().map(|batch| batch.to_token),
        };
        let raw = RawBatch {
            log_records: gps.records,
            status_data: status.map(|batch| batch.records).unwrap_or_default(),
            fault_data: fault.map(|batch| batch.records).unwrap_or_default(),
        };
        let mut stats = IterationStats {
            gps_records: raw.log_records.len(),
            status_records: raw.status_data.len(),
            fault_records: raw.fault_data.len(),
            ..IterationStats::default()
        };
        let hydrated = HydrationPipeline::new(&mut self.cache, self.source)
            .hydrate(raw)
            .await?;

        self.transition(LoopState::Distributing);
        let summary = self.registry.distribute(hydrated);
        let pending = self.registry.pending_devices();
        let flushed = self.registry.flush_all(Utc::now());

        self.transition(LoopState::Persisting);
        self.commit(fetched);
        self.checkpoints.save(self.tokens())?;
        flushed?;
        let refused = summary.errors.len();
        if let Some(first) = summary.errors.into_iter().next() {
            return Err(IterationError::Tracking {
                count: refused,
                first,
            });
        }

        stats.dropped = summary.dropped;
        stats.gps_devices = pending.gps;
        stats.status_devices = pending.status;
        stats.fault_devices = pending.fault;
        Ok(stats)
    }

    fn commit(&mut self, fetched: FetchedTokens) {
        self.gps.commit(fetched.gps);
        if let Some(token) = fetched.status {
            self.status.commit(token);
        }
        if let Some(token) = fetched.fault {
            self.fault.commit(token);
        }
    }

    fn transition(&mut self, next: LoopState) {
        if self.state != next {
            debug!("sync loop {} -> {next}", self.state);
            self.state = next;
        }
    }
}

async fn drain_if<T, S>(
    sync: &FeedSynchronizer<'_, S>,
    enabled: bool,
    start: FeedStart,
) -> Result<Option<FeedBatch<T>>, FeedError>
where
    T: FeedRecord,
    S: FeedSource + ?Sized,
{
    if enabled {
        sync.sync_once(start).await.map(Some)
    } else {
        Ok(None)
    }
}

fn known_diagnostics(cache: &ReferenceCache, ids: &[EntityId]) -> Vec<Arc<CachedDiagnostic>> {
    ids.iter()
        .filter_map(|id| {
            let found = cache.diagnostics().get(id);
            if found.is_none() {
                warn!("ignoring unknown diagnostic {id}");
            }
            found
        })
        .collect()
}

fn known_devices(cache: &ReferenceCache, policy: &TrackingPolicy) -> TrackingPolicy {
    let TrackingPolicy::AllowList(ids) = policy else {
        return TrackingPolicy::Reporting;
    };
    let known: BTreeSet<EntityId> = ids
        .iter()
        .filter(|id| {
            let found = cache.devices().contains(id);
            if !found {
                warn!("ignoring unknown device {id}");
            }
            found
        })
        .cloned()
        .collect();
    if known.is_empty() {
        warn!("no allow-listed device is known; tracking every reporting device");
        TrackingPolicy::Reporting
    } else {
        TrackingPolicy::AllowList(known)
    }
}
