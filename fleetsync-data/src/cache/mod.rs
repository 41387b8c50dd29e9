//! Lookup caches used to hydrate feed records.
//!
//! Devices and diagnostics have feeds of their own and are refreshed
//! incrementally on every call to [`ReferenceCache::refresh`]. Controllers,
//! failure modes and units of measure have no feed; they are re-listed in
//! full once the repopulation deadline passes. Diagnostics embed controller
//! and unit references that are resolved when the diagnostic is cached, so
//! the feedless tables must be filled first.

use std::time::{Duration, Instant};

use fleetsync_core::{
    CachedDiagnostic, Controller, Device, Diagnostic, EntityId, EntityRef, FailureMode,
    FeedError, FeedSource, FeedToken, Resolved, UnitOfMeasure,
};
use log::{debug, info};
use thiserror::Error;

use crate::feed::FeedSynchronizer;
use crate::store::KeyedStore;

/// How long the feedless tables are trusted before they are re-listed.
pub const FEEDLESS_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Errors raised while refreshing the cache.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CacheError {
    /// A remote call failed.
    #[error("failed to refresh reference cache: {0}")]
    Feed(#[from] FeedError),
    /// Diagnostics were refreshed before the feedless tables were filled.
    #[error("diagnostic cache refreshed before controllers and units of measure were loaded")]
    FeedlessNotPopulated,
    /// A diagnostic references a controller absent from the cache.
    #[error("diagnostic {diagnostic} references uncached controller {controller}")]
    UncachedController {
        /// Diagnostic being cached.
        diagnostic: EntityId,
        /// Missing controller.
        controller: EntityId,
    },
    /// A diagnostic references a unit of measure absent from the cache.
    #[error("diagnostic {diagnostic} references uncached unit of measure {unit}")]
    UncachedUnitOfMeasure {
        /// Diagnostic being cached.
        diagnostic: EntityId,
        /// Missing unit.
        unit: EntityId,
    },
}

impl CacheError {
    /// The remote failure behind this error, if any.
    #[must_use]
    pub const fn feed_error(&self) -> Option<&FeedError> {
        match self {
            Self::Feed(err) => Some(err),
            Self::FeedlessNotPopulated
            | Self::UncachedController { .. }
            | Self::UncachedUnitOfMeasure { .. } => None,
        }
    }
}

/// What a call to [`ReferenceCache::refresh`] changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RefreshSummary {
    /// Whether the feedless tables were re-listed.
    pub feedless_reloaded: bool,
    /// Device entries written.
    pub devices: usize,
    /// Diagnostic entries written.
    pub diagnostics: usize,
}

/// Tiered cache of lookup entities.
#[derive(Debug)]
pub struct ReferenceCache {
    devices: KeyedStore<Device>,
    diagnostics: KeyedStore<CachedDiagnostic>,
    controllers: KeyedStore<Controller>,
    failure_modes: KeyedStore<FailureMode>,
    units: KeyedStore<UnitOfMeasure>,
    device_token: FeedToken,
    diagnostic_token: FeedToken,
    refresh_interval: Duration,
    next_feedless_refresh: Option<Instant>,
}

impl Default for ReferenceCache {
    fn default() -> Self {
        Self::with_refresh_interval(FEEDLESS_REFRESH_INTERVAL)
    }
}

impl ReferenceCache {
    /// An empty cache using [`FEEDLESS_REFRESH_INTERVAL`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty cache that re-lists feedless tables every `interval`.
    #[must_use]
    pub fn with_refresh_interval(interval: Duration) -> Self {
        Self {
            devices: KeyedStore::new(),
            diagnostics: KeyedStore::new(),
            controllers: KeyedStore::new(),
            failure_modes: KeyedStore::new(),
            units: KeyedStore::new(),
            device_token: FeedToken::ZERO,
            diagnostic_token: FeedToken::ZERO,
            refresh_interval: interval,
            next_feedless_refresh: None,
        }
    }

    /// Bring every table up to date: feedless tables when due, then devices,
    /// then diagnostics.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] when a remote call fails or a diagnostic
    /// references an uncached controller or unit.
    pub async fn refresh<S>(&mut self, source: &S, now: Instant) -> Result<RefreshSummary, CacheError>
    where
        S: FeedSource + ?Sized,
    {
        let feedless_reloaded = if self.feedless_due(now) {
            self.refresh_feedless(source, now).await?;
            true
        } else {
            false
        };
        let devices = self.refresh_devices(source).await?;
        let diagnostics = self.refresh_diagnostics(source).await?;
        Ok(RefreshSummary {
            feedless_reloaded,
            devices,
            diagnostics,
        })
    }

    /// Whether the feedless tables should be re-listed at `now`.
    #[must_use]
    pub fn feedless_due(&self, now: Instant) -> bool {
        self.next_feedless_refresh
            .is_none_or(|deadline| now >= deadline)
    }

    /// Re-list controllers, failure modes and units of measure, and push the
    /// repopulation deadline out by the refresh interval.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Feed`] when a listing fails; the deadline is
    /// left untouched so the next refresh tries again.
    pub async fn refresh_feedless<S>(&mut self, source: &S, now: Instant) -> Result<(), CacheError>
    where
        S: FeedSource + ?Sized,
    {
        let controllers = self.controllers.merge_page(source.controllers().await?);
        let failure_modes = self.failure_modes.merge_page(source.failure_modes().await?);
        let units = self.units.merge_page(source.units_of_measure().await?);
        self.next_feedless_refresh = Some(now + self.refresh_interval);
        info!(
            "reloaded feedless caches: {} controllers, {} failure modes, {} units of measure",
            controllers.total(),
            failure_modes.total(),
            units.total()
        );
        Ok(())
    }

    /// Merge device changes since the last refresh.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Feed`] when the feed call fails.
    pub async fn refresh_devices<S>(&mut self, source: &S) -> Result<usize, CacheError>
    where
        S: FeedSource + ?Sized,
    {
        FeedSynchronizer::new(source)
            .sync_into::<Device, _, CacheError, _>(&mut self.devices, &mut self.device_token, Ok)
            .await
    }

    /// Merge diagnostic changes since the last refresh, resolving each
    /// diagnostic's controller and unit against the feedless tables.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::FeedlessNotPopulated`] if the feedless tables
    /// were never loaded, an `Uncached*` variant for a dangling reference,
    /// or [`CacheError::Feed`] when the feed call fails.
    pub async fn refresh_diagnostics<S>(&mut self, source: &S) -> Result<usize, CacheError>
    where
        S: FeedSource + ?Sized,
    {
        if self.next_feedless_refresh.is_none() {
            return Err(CacheError::FeedlessNotPopulated);
        }
        let Self {
            diagnostics,
            diagnostic_token,
            controllers,
            units,
            ..
        } = self;
        FeedSynchronizer::new(source)
            .sync_into::<Diagnostic, _, CacheError, _>(diagnostics, diagnostic_token, |diagnostic| {
                cache_diagnostic(diagnostic, controllers, units)
            })
            .await
    }

    /// Resolve a device reference from the cache alone.
    #[must_use]
    pub fn resolve_device(&self, reference: &EntityRef) -> Resolved<Device> {
        resolve_cached(&self.devices, reference)
    }

    /// Resolve a diagnostic reference from the cache alone.
    #[must_use]
    pub fn resolve_diagnostic(&self, reference: &EntityRef) -> Resolved<CachedDiagnostic> {
        resolve_cached(&self.diagnostics, reference)
    }

    /// Resolve a controller reference, fetching and caching it on a miss.
    ///
    /// # Errors
    ///
    /// Returns the [`FeedError`] raised by the lookup.
    pub async fn resolve_controller<S>(
        &mut self,
        source: &S,
        reference: &EntityRef,
    ) -> Result<Resolved<Controller>, FeedError>
    where
        S: FeedSource + ?Sized,
    {
        let EntityRef::Id(id) = reference else {
            return Ok(Resolved::None);
        };
        if let Some(controller) = self.controllers.get(id) {
            return Ok(Resolved::Found(controller));
        }
        debug!("controller {id} not cached; fetching");
        Ok(match source.controller(id).await? {
            Some(controller) => Resolved::Found(self.controllers.put(controller)),
            None => Resolved::NotFound(id.clone()),
        })
    }

    /// Resolve a failure mode reference, fetching and caching it on a miss.
    ///
    /// # Errors
    ///
    /// Returns the [`FeedError`] raised by the lookup.
    pub async fn resolve_failure_mode<S>(
        &mut self,
        source: &S,
        reference: &EntityRef,
    ) -> Result<Resolved<FailureMode>, FeedError>
    where
        S: FeedSource + ?Sized,
    {
        let EntityRef::Id(id) = reference else {
            return Ok(Resolved::None);
        };
        if let Some(mode) = self.failure_modes.get(id) {
            return Ok(Resolved::Found(mode));
        }
        debug!("failure mode {id} not cached; fetching");
        Ok(match source.failure_mode(id).await? {
            Some(mode) => Resolved::Found(self.failure_modes.put(mode)),
            None => Resolved::NotFound(id.clone()),
        })
    }

    /// Cached devices.
    #[must_use]
    pub const fn devices(&self) -> &KeyedStore<Device> {
        &self.devices
    }

    /// Cached diagnostics.
    #[must_use]
    pub const fn diagnostics(&self) -> &KeyedStore<CachedDiagnostic> {
        &self.diagnostics
    }

    /// Cached controllers.
    #[must_use]
    pub const fn controllers(&self) -> &KeyedStore<Controller> {
        &self.controllers
    }

    /// Token the device feed resumes from.
    #[must_use]
    pub const fn device_token(&self) -> FeedToken {
        self.device_token
    }

    /// Token the diagnostic feed resumes from.
    #[must_use]
    pub const fn diagnostic_token(&self) -> FeedToken {
        self.diagnostic_token
    }
}

fn resolve_cached<T: fleetsync_core::Keyed>(
    store: &KeyedStore<T>,
    reference: &EntityRef,
) -> Resolved<T> {
    match reference {
        EntityRef::None => Resolved::None,
        EntityRef::Id(id) => store
            .get(id)
            .map_or_else(|| Resolved::NotFound(id.clone()), Resolved::Found),
    }
}

fn cache_diagnostic(
    diagnostic: Diagnostic,
    controllers: &KeyedStore<Controller>,
    units: &KeyedStore<UnitOfMeasure>,
) -> Result<CachedDiagnostic, CacheError> {
    let controller = match &diagnostic.controller {
        EntityRef::None => Resolved::None,
        EntityRef::Id(id) => Resolved::Found(controllers.get(id).ok_or_else(|| {
            CacheError::UncachedController {
                diagnostic: diagnostic.id.clone(),
                controller: id.clone(),
            }
        })?),
    };
    let unit = match &diagnostic.unit_of_measure {
        EntityRef::None => Resolved::None,
        EntityRef::Id(id) => Resolved::Found(units.get(id).ok_or_else(|| {
            CacheError::UncachedUnitOfMeasure {
                diagnostic: diagnostic.id.clone(),
                unit: id.clone(),
            }
        })?),
    };
    Ok(CachedDiagnostic::from_parts(diagnostic, controller, unit))
}

#[cfg(test)]
mod tests;
