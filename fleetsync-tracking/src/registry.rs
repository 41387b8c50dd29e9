//! Routing hydrated records to tracked devices.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use fleetsync_core::{CachedDiagnostic, Device, DiagnosticCategory, EntityId, EntityRef, Resolved};
use fleetsync_data::HydratedBatch;
use log::{debug, error, warn};

use crate::config::TrackingPolicy;
use crate::entity::{TrackedDiagnostic, TrackedEntity, TrackingError};
use crate::format::DeviceIdentity;
use crate::sink::SinkError;

/// Outcome of one call to [`TrackingRegistry::distribute`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DistributionSummary {
    /// Position reports buffered.
    pub positions: usize,
    /// Status readings buffered.
    pub statuses: usize,
    /// Fault events buffered.
    pub faults: usize,
    /// Records dropped by policy, diagnostic filter or "none" device.
    pub dropped: usize,
    /// Records refused by their device, in delivery order.
    pub errors: Vec<TrackingError>,
}

impl DistributionSummary {
    fn record(
        &mut self,
        outcome: Option<Result<(), TrackingError>>,
        counter: fn(&mut Self) -> &mut usize,
    ) {
        match outcome {
            None => self.dropped += 1,
            Some(Ok(())) => *counter(self) += 1,
            Some(Err(err)) => {
                error!("refused record: {err}");
                self.errors.push(err);
            }
        }
    }
}

/// Devices holding unwritten data, per category.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PendingDevices {
    /// Devices with new position reports.
    pub gps: Vec<EntityId>,
    /// Devices with new status readings.
    pub status: Vec<EntityId>,
    /// Devices with new fault events.
    pub fault: Vec<EntityId>,
}

/// Tracked devices keyed by identifier, created under a fixed policy.
#[derive(Debug)]
pub struct TrackingRegistry {
    policy: TrackingPolicy,
    templates: Vec<TrackedDiagnostic>,
    interest: BTreeSet<EntityId>,
    output_dir: Utf8PathBuf,
    max_file_bytes: u64,
    entities: BTreeMap<EntityId, TrackedEntity>,
}

impl TrackingRegistry {
    /// Build a registry tracking `diagnostics` on every admitted device.
    ///
    /// # Errors
    ///
    /// Returns [`TrackingError::UnsupportedDiagnostic`] when a diagnostic's
    /// type is carried by no feed.
    pub fn new(
        policy: TrackingPolicy,
        diagnostics: Vec<Arc<CachedDiagnostic>>,
        output_dir: Utf8PathBuf,
        max_file_bytes: u64,
    ) -> Result<Self, TrackingError> {
        let templates = diagnostics
            .into_iter()
            .map(TrackedDiagnostic::new)
            .collect::<Result<Vec<_>, _>>()?;
        let interest = templates
            .iter()
            .map(|template| template.diagnostic().id.clone())
            .collect();
        Ok(Self {
            policy,
            templates,
            interest,
            output_dir,
            max_file_bytes,
            entities: BTreeMap::new(),
        })
    }

    /// Policy deciding which devices are tracked.
    #[must_use]
    pub const fn policy(&self) -> &TrackingPolicy {
        &self.policy
    }

    /// Whether any diagnostic of interest is carried by the status feed.
    #[must_use]
    pub fn needs_status_data(&self) -> bool {
        self.needs(DiagnosticCategory::Status)
    }

    /// Whether any diagnostic of interest is carried by the fault feed.
    #[must_use]
    pub fn needs_fault_data(&self) -> bool {
        self.needs(DiagnosticCategory::Fault)
    }

    fn needs(&self, category: DiagnosticCategory) -> bool {
        self.templates
            .iter()
            .any(|template| template.category() == category)
    }

    /// Whether `diagnostic` is one of the diagnostics of interest.
    #[must_use]
    pub fn is_of_interest(&self, diagnostic: &EntityRef) -> bool {
        diagnostic.id().is_some_and(|id| self.interest.contains(id))
    }

    /// The tracked device with `id`, if any.
    #[must_use]
    pub fn get(&self, id: &EntityId) -> Option<&TrackedEntity> {
        self.entities.get(id)
    }

    /// Number of tracked devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether no device is tracked yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Tracked devices in identifier order.
    #[must_use]
    pub fn entities(&self) -> impl Iterator<Item = &TrackedEntity> {
        self.entities.values()
    }

    /// The entity for `device`, creating it when the policy admits it.
    ///
    /// Returns `None` for the "none" device and for devices the policy
    /// excludes. A device that was not found in the cache is tracked under
    /// its identifier with an empty name and serial number.
    pub fn get_or_create(&mut self, device: &Resolved<Device>) -> Option<&mut TrackedEntity> {
        let id = match device {
            Resolved::None => return None,
            Resolved::Found(found) => &found.id,
            Resolved::NotFound(missing) => missing,
        };
        if !self.policy.admits(id) {
            return None;
        }
        let Self {
            templates,
            output_dir,
            max_file_bytes,
            entities,
            ..
        } = self;
        let entity = entities.entry(id.clone()).or_insert_with(|| {
            debug!("tracking device {id}");
            let identity = device.found().map_or_else(
                || DeviceIdentity::unresolved(id.clone()),
                DeviceIdentity::from_device,
            );
            TrackedEntity::new(identity, templates.as_slice(), output_dir, *max_file_bytes)
        });
        Some(entity)
    }

    /// Buffer every record of `batch` on its device.
    ///
    /// Status and fault records for diagnostics outside the set of interest
    /// are skipped before any device is created. A record refused by its
    /// device is reported in the summary and does not stop the rest of the
    /// batch.
    pub fn distribute(&mut self, batch: HydratedBatch) -> DistributionSummary {
        let mut summary = DistributionSummary::default();
        for record in batch.positions {
            let outcome = self
                .get_or_create(&record.device)
                .map(|entity| entity.add_position(record));
            summary.record(outcome, |counts| &mut counts.positions);
        }
        for record in batch.statuses {
            let outcome = if self.is_of_interest(&record.raw.diagnostic) {
                self.get_or_create(&record.device)
                    .map(|entity| entity.add_status(record))
            } else {
                None
            };
            summary.record(outcome, |counts| &mut counts.statuses);
        }
        for record in batch.faults {
            let outcome = if self.is_of_interest(&record.raw.diagnostic) {
                self.get_or_create(&record.device)
                    .map(|entity| entity.add_fault(record))
            } else {
                None
            };
            summary.record(outcome, |counts| &mut counts.faults);
        }
        if summary.dropped > 0 {
            debug!("dropped {} untracked records", summary.dropped);
        }
        summary
    }

    /// Devices currently holding unwritten data.
    #[must_use]
    pub fn pending_devices(&self) -> PendingDevices {
        let pick = |wanted: fn(&TrackedEntity) -> bool| {
            self.entities
                .values()
                .filter(|entity| wanted(entity))
                .map(|entity| entity.id().clone())
                .collect()
        };
        PendingDevices {
            gps: pick(TrackedEntity::has_new_gps_data),
            status: pick(TrackedEntity::has_new_status_data),
            fault: pick(TrackedEntity::has_new_fault_data),
        }
    }

    /// Flush every tracked device. A failing device does not stop the
    /// others from being flushed.
    ///
    /// # Errors
    ///
    /// Returns the first [`SinkError`] encountered.
    pub fn flush_all(&mut self, now: DateTime<Utc>) -> Result<(), SinkError> {
        let mut first_error = None;
        for entity in self.entities.values_mut() {
            if let Err(err) = entity.flush(now) {
                warn!("failed to write data for device {}: {err}", entity.id());
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    #![expect(clippy::expect_used, reason = "tests fail fast on setup errors")]

    use super::*;
    use chrono::TimeZone;
    use fleetsync_core::{
        Diagnostic, DiagnosticType, GpsRecord, LogRecord, StatusData, StatusRecord,
    };
    use rstest::rstest;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, minute, 0)
            .single()
            .expect("valid timestamp")
    }

    fn engine_speed() -> Arc<CachedDiagnostic> {
        Arc::new(CachedDiagnostic::from_parts(
            Diagnostic::new(
                "DiagnosticEngineSpeedId",
                "Engine speed",
                DiagnosticType::GoDiagnostic,
            ),
            Resolved::None,
            Resolved::None,
        ))
    }

    fn registry(policy: TrackingPolicy) -> TrackingRegistry {
        TrackingRegistry::new(
            policy,
            vec![engine_speed()],
            Utf8PathBuf::from("unused"),
            1_024_000,
        )
        .expect("supported diagnostics")
    }

    fn position(device: Resolved<Device>, reference: EntityRef) -> GpsRecord {
        GpsRecord {
            raw: LogRecord {
                id: None,
                date_time: at(1),
                device: reference,
                latitude: 0.0,
                longitude: 0.0,
                speed: 0.0,
            },
            device,
        }
    }

    fn status(device: &str, diagnostic: &str) -> StatusRecord {
        StatusRecord {
            raw: StatusData {
                id: None,
                date_time: at(1),
                device: EntityRef::from_id(device),
                diagnostic: EntityRef::from_id(diagnostic),
                data: 0.0,
            },
            device: Resolved::NotFound(EntityId::from(device)),
            diagnostic: Resolved::NotFound(EntityId::from(diagnostic)),
        }
    }

    #[rstest]
    fn reporting_mode_tracks_devices_on_first_sight() {
        let mut registry = registry(TrackingPolicy::Reporting);
        let found = Resolved::Found(Arc::new(Device::new("b1", "Truck 1", "G1")));

        let summary = registry.distribute(HydratedBatch {
            positions: vec![position(found, EntityRef::from_id("b1"))],
            ..HydratedBatch::default()
        });

        assert_eq!(summary.positions, 1);
        let entity = registry.get(&EntityId::from("b1")).expect("tracked");
        assert_eq!(entity.identity().name, "Truck 1");
        assert!(entity.has_new_gps_data());
    }

    #[rstest]
    fn allow_list_drops_other_devices() {
        let mut registry = registry(TrackingPolicy::AllowList(BTreeSet::from([
            EntityId::from("b2"),
        ])));
        let unknown = Resolved::NotFound(EntityId::from("b1"));

        let summary = registry.distribute(HydratedBatch {
            positions: vec![position(unknown, EntityRef::from_id("b1"))],
            ..HydratedBatch::default()
        });

        assert_eq!(summary.dropped, 1);
        assert!(registry.is_empty());
    }

    #[rstest]
    fn none_devices_are_dropped() {
        let mut registry = registry(TrackingPolicy::Reporting);
        assert!(registry.get_or_create(&Resolved::None).is_none());
        assert!(registry.is_empty());
    }

    #[rstest]
    fn unknown_devices_are_tracked_by_identifier() {
        let mut registry = registry(TrackingPolicy::Reporting);
        let entity = registry
            .get_or_create(&Resolved::NotFound(EntityId::from("b404")))
            .expect("tracked");
        assert_eq!(entity.id().as_str(), "b404");
        assert!(entity.identity().serial_number.is_empty());
    }

    #[rstest]
    fn uninteresting_diagnostics_never_create_devices() {
        let mut registry = registry(TrackingPolicy::Reporting);
        let summary = registry.distribute(HydratedBatch {
            statuses: vec![status("b1", "DiagnosticFuelLevelId")],
            ..HydratedBatch::default()
        });

        assert_eq!(summary.dropped, 1);
        assert!(registry.is_empty());
    }

    #[rstest]
    fn interesting_status_data_is_buffered() {
        let mut registry = registry(TrackingPolicy::Reporting);
        registry.distribute(HydratedBatch {
            statuses: vec![status("b1", "DiagnosticEngineSpeedId")],
            ..HydratedBatch::default()
        });

        let pending = registry.pending_devices();
        assert_eq!(pending.status, vec![EntityId::from("b1")]);
        assert!(pending.gps.is_empty());
        assert!(registry.needs_status_data());
        assert!(!registry.needs_fault_data());
    }

    #[rstest]
    fn refused_records_do_not_stop_the_batch() {
        let mut registry = registry(TrackingPolicy::Reporting);
        let found = Resolved::Found(Arc::new(Device::new("b1", "Truck 1", "G1")));
        let summary = registry.distribute(HydratedBatch {
            positions: vec![
                position(found.clone(), EntityRef::from_id("b2")),
                position(found, EntityRef::from_id("b1")),
            ],
            ..HydratedBatch::default()
        });
        assert!(matches!(
            summary.errors.as_slice(),
            [TrackingError::DeviceMismatch { .. }]
        ));
        assert_eq!(summary.positions, 1, "later records are still buffered");
    }

    #[rstest]
    fn unsupported_diagnostics_fail_construction() {
        let none_type = Arc::new(CachedDiagnostic::from_parts(
            Diagnostic::new("DiagnosticOddId", "Odd", DiagnosticType::None),
            Resolved::None,
            Resolved::None,
        ));
        let err = TrackingRegistry::new(
            TrackingPolicy::Reporting,
            vec![none_type],
            Utf8PathBuf::from("unused"),
            1,
        )
        .expect_err("type none cannot be tracked");
        assert!(matches!(err, TrackingError::UnsupportedDiagnostic { .. }));
    }
}
