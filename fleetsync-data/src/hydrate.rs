//! Rewriting raw feed records into self-contained ones.

use fleetsync_core::{
    FaultData, FaultRecord, FeedError, FeedSource, GpsRecord, LogRecord, StatusData,
    StatusRecord,
};

use crate::cache::ReferenceCache;

/// Raw records pulled from the three primary feeds in one iteration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawBatch {
    /// Position reports in delivery order.
    pub log_records: Vec<LogRecord>,
    /// Status readings in delivery order.
    pub status_data: Vec<StatusData>,
    /// Fault events in delivery order.
    pub fault_data: Vec<FaultData>,
}

/// Hydrated records, each feed still in delivery order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HydratedBatch {
    /// Hydrated position reports.
    pub positions: Vec<GpsRecord>,
    /// Hydrated status readings.
    pub statuses: Vec<StatusRecord>,
    /// Hydrated fault events.
    pub faults: Vec<FaultRecord>,
}

/// Resolves record references through a [`ReferenceCache`].
///
/// Device and diagnostic references are resolved from the cache only.
/// Controller and failure-mode references on fault events may trigger one
/// remote lookup each, cached thereafter.
#[derive(Debug)]
pub struct HydrationPipeline<'a, S: ?Sized> {
    cache: &'a mut ReferenceCache,
    source: &'a S,
}

impl<'a, S> HydrationPipeline<'a, S>
where
    S: FeedSource + ?Sized,
{
    /// Borrow the cache and the source for one hydration pass.
    pub const fn new(cache: &'a mut ReferenceCache, source: &'a S) -> Self {
        Self { cache, source }
    }

    /// Hydrate a whole batch.
    ///
    /// # Errors
    ///
    /// Returns the [`FeedError`] raised by a controller or failure-mode
    /// lookup.
    pub async fn hydrate(&mut self, raw: RawBatch) -> Result<HydratedBatch, FeedError> {
        let positions = raw
            .log_records
            .into_iter()
            .map(|record| self.position(record))
            .collect();
        let statuses = raw
            .status_data
            .into_iter()
            .map(|record| self.status(record))
            .collect();
        let mut faults = Vec::with_capacity(raw.fault_data.len());
        for record in raw.fault_data {
            faults.push(self.fault(record).await?);
        }
        Ok(HydratedBatch {
            positions,
            statuses,
            faults,
        })
    }

    /// Hydrate one position report.
    #[must_use]
    pub fn position(&self, raw: LogRecord) -> GpsRecord {
        let device = self.cache.resolve_device(&raw.device);
        GpsRecord { raw, device }
    }

    /// Hydrate one status reading.
    #[must_use]
    pub fn status(&self, raw: StatusData) -> StatusRecord {
        let device = self.cache.resolve_device(&raw.device);
        let diagnostic = self.cache.resolve_diagnostic(&raw.diagnostic);
        StatusRecord {
            raw,
            device,
            diagnostic,
        }
    }

    /// Hydrate one fault event.
    ///
    /// # Errors
    ///
    /// Returns the [`FeedError`] raised by a controller or failure-mode
    /// lookup.
    pub async fn fault(&mut self, raw: FaultData) -> Result<FaultRecord, FeedError> {
        let device = self.cache.resolve_device(&raw.device);
        let diagnostic = self.cache.resolve_diagnostic(&raw.diagnostic);
        let controller = self
            .cache
            .resolve_controller(self.source, &raw.controller)
            .await?;
        let failure_mode = self
            .cache
            .resolve_failure_mode(self.source, &raw.failure_mode)
            .await?;
        Ok(FaultRecord {
            raw,
            device,
            diagnostic,
            controller,
            failure_mode,
        })
    }
}
