//! Per-device accumulation buffers and the files they flush to.

use std::collections::BTreeMap;
use std::sync::Arc;

use camino::Utf8Path;
use chrono::{DateTime, Utc};
use fleetsync_core::{
    CachedDiagnostic, DiagnosticCategory, EntityId, EntityRef, FaultRecord, GpsRecord,
    StatusRecord, Timestamped, UnsupportedDiagnosticType,
};
use thiserror::Error;

use crate::format::{self, DeviceIdentity, OutputCategory};
use crate::sink::{RotatingFileSink, SinkError};

/// Invariant violations raised while routing records.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum TrackingError {
    /// A record was offered to the entity of another device.
    #[error("record for device {found:?} offered to tracked device {expected}")]
    DeviceMismatch {
        /// Device of the entity.
        expected: EntityId,
        /// Device named by the record.
        found: Option<EntityId>,
    },
    /// A record names a diagnostic the entity does not track.
    #[error("device {device} does not track diagnostic {diagnostic:?}")]
    UntrackedDiagnostic {
        /// Device of the entity.
        device: EntityId,
        /// Diagnostic named by the record.
        diagnostic: Option<EntityId>,
    },
    /// A status record was offered to a fault diagnostic, or the reverse.
    #[error("diagnostic {diagnostic} carries {category:?} data only")]
    CategoryMismatch {
        /// Diagnostic involved.
        diagnostic: EntityId,
        /// Category the diagnostic belongs to.
        category: DiagnosticCategory,
    },
    /// A diagnostic of interest has a type no feed carries.
    #[error("diagnostic {diagnostic} cannot be tracked: {source}")]
    UnsupportedDiagnostic {
        /// Diagnostic involved.
        diagnostic: EntityId,
        /// Classification failure.
        #[source]
        source: UnsupportedDiagnosticType,
    },
}

#[derive(Debug, Clone)]
enum DiagnosticBuffer {
    Status(Vec<StatusRecord>),
    Fault(Vec<FaultRecord>),
}

/// One diagnostic of interest on one device, with its pending records.
#[derive(Debug, Clone)]
pub struct TrackedDiagnostic {
    diagnostic: Arc<CachedDiagnostic>,
    buffer: DiagnosticBuffer,
}

impl TrackedDiagnostic {
    /// Classify `diagnostic` and start with an empty buffer.
    ///
    /// # Errors
    ///
    /// Returns [`TrackingError::UnsupportedDiagnostic`] when no feed carries
    /// the diagnostic's type.
    pub fn new(diagnostic: Arc<CachedDiagnostic>) -> Result<Self, TrackingError> {
        let category = diagnostic.diagnostic_type.category().map_err(|source| {
            TrackingError::UnsupportedDiagnostic {
                diagnostic: diagnostic.id.clone(),
                source,
            }
        })?;
        let buffer = match category {
            DiagnosticCategory::Status => DiagnosticBuffer::Status(Vec::new()),
            DiagnosticCategory::Fault => DiagnosticBuffer::Fault(Vec::new()),
        };
        Ok(Self { diagnostic, buffer })
    }

    /// The diagnostic tracked.
    #[must_use]
    pub fn diagnostic(&self) -> &CachedDiagnostic {
        &self.diagnostic
    }

    /// Which feed carries this diagnostic's data.
    #[must_use]
    pub const fn category(&self) -> DiagnosticCategory {
        match self.buffer {
            DiagnosticBuffer::Status(_) => DiagnosticCategory::Status,
            DiagnosticBuffer::Fault(_) => DiagnosticCategory::Fault,
        }
    }

    /// Number of records waiting to be written.
    #[must_use]
    pub fn pending(&self) -> usize {
        match &self.buffer {
            DiagnosticBuffer::Status(records) => records.len(),
            DiagnosticBuffer::Fault(records) => records.len(),
        }
    }

    fn push_status(&mut self, record: StatusRecord) -> Result<(), TrackingError> {
        if let DiagnosticBuffer::Status(records) = &mut self.buffer {
            records.push(record);
            return Ok(());
        }
        Err(self.category_mismatch())
    }

    fn push_fault(&mut self, record: FaultRecord) -> Result<(), TrackingError> {
        if let DiagnosticBuffer::Fault(records) = &mut self.buffer {
            records.push(record);
            return Ok(());
        }
        Err(self.category_mismatch())
    }

    fn category_mismatch(&self) -> TrackingError {
        TrackingError::CategoryMismatch {
            diagnostic: self.diagnostic.id.clone(),
            category: self.category(),
        }
    }

    fn statuses(&self) -> &[StatusRecord] {
        match &self.buffer {
            DiagnosticBuffer::Status(records) => records,
            DiagnosticBuffer::Fault(_) => &[],
        }
    }

    fn faults(&self) -> &[FaultRecord] {
        match &self.buffer {
            DiagnosticBuffer::Fault(records) => records,
            DiagnosticBuffer::Status(_) => &[],
        }
    }

    fn clear(&mut self, category: DiagnosticCategory) {
        match (&mut self.buffer, category) {
            (DiagnosticBuffer::Status(records), DiagnosticCategory::Status) => records.clear(),
            (DiagnosticBuffer::Fault(records), DiagnosticCategory::Fault) => records.clear(),
            (DiagnosticBuffer::Status(_), DiagnosticCategory::Fault)
            | (DiagnosticBuffer::Fault(_), DiagnosticCategory::Status) => {}
        }
    }
}

/// A tracked device: its identity, pending records and output files.
///
/// Records accumulate until [`TrackedEntity::flush`] writes them, sorted by
/// event time, to one position file and one shared file per diagnostic
/// category.
#[derive(Debug)]
pub struct TrackedEntity {
    identity: DeviceIdentity,
    positions: Vec<GpsRecord>,
    diagnostics: BTreeMap<EntityId, TrackedDiagnostic>,
    gps_sink: RotatingFileSink,
    status_sink: RotatingFileSink,
    fault_sink: RotatingFileSink,
}

impl TrackedEntity {
    /// A device with empty buffers for each of `diagnostics`.
    #[must_use]
    pub fn new(
        identity: DeviceIdentity,
        diagnostics: &[TrackedDiagnostic],
        output_dir: &Utf8Path,
        max_file_bytes: u64,
    ) -> Self {
        let sink = |category| {
            RotatingFileSink::new(
                output_dir.to_path_buf(),
                category,
                identity.id.clone(),
                max_file_bytes,
            )
        };
        let gps_sink = sink(OutputCategory::Gps);
        let status_sink = sink(OutputCategory::Status);
        let fault_sink = sink(OutputCategory::Fault);
        let tracked = diagnostics
            .iter()
            .map(|template| (template.diagnostic.id.clone(), template.clone()))
            .collect();
        Self {
            identity,
            positions: Vec::new(),
            diagnostics: tracked,
            gps_sink,
            status_sink,
            fault_sink,
        }
    }

    /// Device identifier.
    #[must_use]
    pub const fn id(&self) -> &EntityId {
        &self.identity.id
    }

    /// Identity written into output lines.
    #[must_use]
    pub const fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Whether records for `diagnostic` are kept.
    #[must_use]
    pub fn tracks_diagnostic(&self, diagnostic: &EntityId) -> bool {
        self.diagnostics.contains_key(diagnostic)
    }

    /// Diagnostics tracked on this device.
    #[must_use]
    pub fn diagnostics(&self) -> impl Iterator<Item = &TrackedDiagnostic> {
        self.diagnostics.values()
    }

    /// Buffer a position report.
    ///
    /// # Errors
    ///
    /// Returns [`TrackingError::DeviceMismatch`] for another device's record.
    pub fn add_position(&mut self, record: GpsRecord) -> Result<(), TrackingError> {
        self.check_device(&record.raw.device)?;
        self.identity.refresh(&record.device);
        self.positions.push(record);
        Ok(())
    }

    /// Buffer a status reading.
    ///
    /// # Errors
    ///
    /// Returns a [`TrackingError`] when the record belongs to another
    /// device, an untracked diagnostic or a fault diagnostic.
    pub fn add_status(&mut self, record: StatusRecord) -> Result<(), TrackingError> {
        self.check_device(&record.raw.device)?;
        self.identity.refresh(&record.device);
        self.diagnostic_mut(&record.raw.diagnostic)?
            .push_status(record)
    }

    /// Buffer a fault event.
    ///
    /// # Errors
    ///
    /// Returns a [`TrackingError`] when the record belongs to another
    /// device, an untracked diagnostic or a status diagnostic.
    pub fn add_fault(&mut self, record: FaultRecord) -> Result<(), TrackingError> {
        self.check_device(&record.raw.device)?;
        self.identity.refresh(&record.device);
        self.diagnostic_mut(&record.raw.diagnostic)?
            .push_fault(record)
    }

    /// Whether position reports are waiting to be written.
    #[must_use]
    pub fn has_new_gps_data(&self) -> bool {
        !self.positions.is_empty()
    }

    /// Whether status readings are waiting to be written.
    #[must_use]
    pub fn has_new_status_data(&self) -> bool {
        self.diagnostics
            .values()
            .any(|tracked| !tracked.statuses().is_empty())
    }

    /// Whether fault events are waiting to be written.
    #[must_use]
    pub fn has_new_fault_data(&self) -> bool {
        self.diagnostics
            .values()
            .any(|tracked| !tracked.faults().is_empty())
    }

    /// Write every pending record, oldest first, and clear what was written.
    ///
    /// All three files are attempted even when one fails; buffers of a
    /// failed file are kept for the next flush.
    ///
    /// # Errors
    ///
    /// Returns the first [`SinkError`] encountered.
    pub fn flush(&mut self, now: DateTime<Utc>) -> Result<(), SinkError> {
        let gps = self.flush_positions(now);
        let status = self.flush_statuses(now);
        let fault = self.flush_faults(now);
        gps.and(status).and(fault)
    }

    fn flush_positions(&mut self, now: DateTime<Utc>) -> Result<(), SinkError> {
        if self.positions.is_empty() {
            return Ok(());
        }
        self.positions.sort_by_key(Timestamped::timestamp);
        let lines: Vec<String> = self
            .positions
            .iter()
            .map(|record| format::gps_line(&self.identity, record))
            .collect();
        self.gps_sink.write_lines(&lines, now)?;
        self.positions.clear();
        Ok(())
    }

    fn flush_statuses(&mut self, now: DateTime<Utc>) -> Result<(), SinkError> {
        let mut pending: Vec<&StatusRecord> = self
            .diagnostics
            .values()
            .flat_map(TrackedDiagnostic::statuses)
            .collect();
        if pending.is_empty() {
            return Ok(());
        }
        pending.sort_by_key(|record| record.timestamp());
        let lines: Vec<String> = pending
            .into_iter()
            .map(|record| format::status_line(&self.identity, record))
            .collect();
        self.status_sink.write_lines(&lines, now)?;
        self.clear_diagnostics(DiagnosticCategory::Status);
        Ok(())
    }

    fn flush_faults(&mut self, now: DateTime<Utc>) -> Result<(), SinkError> {
        let mut pending: Vec<&FaultRecord> = self
            .diagnostics
            .values()
            .flat_map(TrackedDiagnostic::faults)
            .collect();
        if pending.is_empty() {
            return Ok(());
        }
        pending.sort_by_key(|record| record.timestamp());
        let lines: Vec<String> = pending
            .into_iter()
            .map(|record| format::fault_line(&self.identity, record))
            .collect();
        self.fault_sink.write_lines(&lines, now)?;
        self.clear_diagnostics(DiagnosticCategory::Fault);
        Ok(())
    }

    fn clear_diagnostics(&mut self, category: DiagnosticCategory) {
        for tracked in self.diagnostics.values_mut() {
            tracked.clear(category);
        }
    }

    fn check_device(&self, device: &EntityRef) -> Result<(), TrackingError> {
        if device.id() == Some(&self.identity.id) {
            Ok(())
        } else {
            Err(TrackingError::DeviceMismatch {
                expected: self.identity.id.clone(),
                found: device.id().cloned(),
            })
        }
    }

    fn diagnostic_mut(
        &mut self,
        diagnostic: &EntityRef,
    ) -> Result<&mut TrackedDiagnostic, TrackingError> {
        let device = &self.identity.id;
        diagnostic
            .id()
            .and_then(|id| self.diagnostics.get_mut(id))
            .ok_or_else(|| TrackingError::UntrackedDiagnostic {
                device: device.clone(),
                diagnostic: diagnostic.id().cloned(),
            })
    }
}

#[cfg(test)]
mod tests {
    #![expect(clippy::expect_used, reason = "tests fail fast on setup errors")]

    use super::*;
    use chrono::TimeZone;
    use fleetsync_core::{
        Device, Diagnostic, DiagnosticType, FaultData, LogRecord, Resolved, StatusData,
    };
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    struct Workspace {
        _tmp: TempDir,
        root: camino::Utf8PathBuf,
    }

    #[fixture]
    fn workspace() -> Workspace {
        let tmp = TempDir::new().expect("tempdir");
        let root = camino::Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
            .expect("utf-8 tempdir");
        Workspace { _tmp: tmp, root }
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, minute, 0)
            .single()
            .expect("valid timestamp")
    }

    fn tracked(id: &str, diagnostic_type: DiagnosticType) -> TrackedDiagnostic {
        let diagnostic = Diagnostic::new(id, id, diagnostic_type);
        TrackedDiagnostic::new(Arc::new(CachedDiagnostic::from_parts(
            diagnostic,
            Resolved::None,
            Resolved::None,
        )))
        .expect("supported diagnostic")
    }

    fn entity(root: &Utf8Path) -> TrackedEntity {
        TrackedEntity::new(
            DeviceIdentity::unresolved(EntityId::from("b1")),
            &[
                tracked("DiagnosticEngineSpeedId", DiagnosticType::GoDiagnostic),
                tracked("DiagnosticLowOilId", DiagnosticType::GoFault),
            ],
            root,
            1_024_000,
        )
    }

    fn position(device: &str, minute: u32) -> GpsRecord {
        GpsRecord {
            raw: LogRecord {
                id: None,
                date_time: at(minute),
                device: EntityRef::from_id(device),
                latitude: 43.0,
                longitude: -79.0,
                speed: 42.0,
            },
            device: Resolved::Found(Arc::new(Device::new(device, "Truck 1", "G1"))),
        }
    }

    fn status(diagnostic: &str, minute: u32) -> StatusRecord {
        StatusRecord {
            raw: StatusData {
                id: None,
                date_time: at(minute),
                device: EntityRef::from_id("b1"),
                diagnostic: EntityRef::from_id(diagnostic),
                data: 1_500.0,
            },
            device: Resolved::NotFound(EntityId::from("b1")),
            diagnostic: Resolved::NotFound(EntityId::from(diagnostic)),
        }
    }

    fn fault(diagnostic: &str, minute: u32) -> FaultRecord {
        FaultRecord {
            raw: FaultData {
                id: None,
                date_time: at(minute),
                device: EntityRef::from_id("b1"),
                diagnostic: EntityRef::from_id(diagnostic),
                controller: EntityRef::None,
                failure_mode: EntityRef::None,
                count: 1,
                fault_state: None,
                malfunction_lamp: false,
                red_stop_lamp: false,
                amber_warning_lamp: false,
                protect_warning_lamp: false,
                dismiss_date_time: None,
                dismiss_user: None,
            },
            device: Resolved::NotFound(EntityId::from("b1")),
            diagnostic: Resolved::NotFound(EntityId::from(diagnostic)),
            controller: Resolved::None,
            failure_mode: Resolved::None,
        }
    }

    #[rstest]
    fn unsupported_diagnostic_types_are_rejected() {
        let diagnostic = CachedDiagnostic::from_parts(
            Diagnostic::new("DiagnosticMysteryId", "Mystery", DiagnosticType::None),
            Resolved::None,
            Resolved::None,
        );
        let err = TrackedDiagnostic::new(Arc::new(diagnostic))
            .expect_err("type none has no feed");
        assert!(matches!(err, TrackingError::UnsupportedDiagnostic { .. }));
    }

    #[rstest]
    fn new_data_flags_follow_add_and_flush(workspace: Workspace) {
        let mut entity = entity(&workspace.root);
        assert!(!entity.has_new_gps_data());
        assert!(!entity.has_new_status_data());
        assert!(!entity.has_new_fault_data());

        entity.add_position(position("b1", 1)).expect("position");
        entity
            .add_status(status("DiagnosticEngineSpeedId", 1))
            .expect("status");
        assert!(entity.has_new_gps_data());
        assert!(entity.has_new_status_data());
        assert!(!entity.has_new_fault_data());

        entity.add_fault(fault("DiagnosticLowOilId", 0)).expect("fault");
        assert!(entity.has_new_fault_data());

        entity.flush(at(30)).expect("flush");
        assert!(!entity.has_new_gps_data());
        assert!(!entity.has_new_status_data());
        assert!(!entity.has_new_fault_data());
    }

    #[rstest]
    fn positions_are_written_in_time_order(workspace: Workspace) {
        let mut entity = entity(&workspace.root);
        for minute in [5, 1, 3] {
            entity.add_position(position("b1", minute)).expect("position");
        }
        entity.flush(at(30)).expect("flush");

        let path = entity.gps_sink.current_path().expect("gps file");
        let contents = fleetsync_fs::read_optional_string(path)
            .expect("read")
            .expect("file exists");
        let times: Vec<&str> = contents
            .lines()
            .skip(1)
            .filter_map(|line| line.split('|').nth(3))
            .collect();
        assert_eq!(
            times,
            vec![
                "2024-03-01T10:01:00.000Z",
                "2024-03-01T10:03:00.000Z",
                "2024-03-01T10:05:00.000Z",
            ]
        );
    }

    fn several_diagnostics(root: &Utf8Path) -> TrackedEntity {
        TrackedEntity::new(
            DeviceIdentity::unresolved(EntityId::from("b1")),
            &[
                tracked("DiagnosticEngineSpeedId", DiagnosticType::GoDiagnostic),
                tracked("DiagnosticCoolantTemperatureId", DiagnosticType::GoDiagnostic),
                tracked("DiagnosticLowOilId", DiagnosticType::GoFault),
                tracked("DiagnosticLowBatteryId", DiagnosticType::GoFault),
            ],
            root,
            1_024_000,
        )
    }

    /// Event time and diagnostic id of every data line in `sink`'s file.
    fn written_events(sink: &RotatingFileSink) -> Vec<(String, String)> {
        let path = sink.current_path().expect("output file");
        let contents = fleetsync_fs::read_optional_string(path)
            .expect("read")
            .expect("file exists");
        contents
            .lines()
            .skip(1)
            .map(|line| {
                let mut columns = line.split('|').skip(3);
                let time = columns.next().expect("time column").to_owned();
                let diagnostic = columns.next().expect("diagnostic column").to_owned();
                (time, diagnostic)
            })
            .collect()
    }

    fn expected_events(events: &[(&str, &str)]) -> Vec<(String, String)> {
        events
            .iter()
            .map(|(time, diagnostic)| ((*time).to_owned(), (*diagnostic).to_owned()))
            .collect()
    }

    #[rstest]
    fn status_from_several_diagnostics_is_written_in_time_order(workspace: Workspace) {
        let mut entity = several_diagnostics(&workspace.root);
        for (diagnostic, minute) in [
            ("DiagnosticEngineSpeedId", 7),
            ("DiagnosticCoolantTemperatureId", 5),
            ("DiagnosticEngineSpeedId", 2),
            ("DiagnosticCoolantTemperatureId", 1),
        ] {
            entity.add_status(status(diagnostic, minute)).expect("status");
        }
        entity.flush(at(30)).expect("flush");

        assert_eq!(
            written_events(&entity.status_sink),
            expected_events(&[
                ("2024-03-01T10:01:00.000Z", "DiagnosticCoolantTemperatureId"),
                ("2024-03-01T10:02:00.000Z", "DiagnosticEngineSpeedId"),
                ("2024-03-01T10:05:00.000Z", "DiagnosticCoolantTemperatureId"),
                ("2024-03-01T10:07:00.000Z", "DiagnosticEngineSpeedId"),
            ])
        );
    }

    #[rstest]
    fn faults_from_several_diagnostics_are_written_in_time_order(workspace: Workspace) {
        let mut entity = several_diagnostics(&workspace.root);
        for (diagnostic, minute) in [
            ("DiagnosticLowOilId", 9),
            ("DiagnosticLowBatteryId", 4),
            ("DiagnosticLowOilId", 3),
            ("DiagnosticLowBatteryId", 8),
        ] {
            entity.add_fault(fault(diagnostic, minute)).expect("fault");
        }
        entity.flush(at(30)).expect("flush");

        assert_eq!(
            written_events(&entity.fault_sink),
            expected_events(&[
                ("2024-03-01T10:03:00.000Z", "DiagnosticLowOilId"),
                ("2024-03-01T10:04:00.000Z", "DiagnosticLowBatteryId"),
                ("2024-03-01T10:08:00.000Z", "DiagnosticLowBatteryId"),
                ("2024-03-01T10:09:00.000Z", "DiagnosticLowOilId"),
            ])
        );
    }

    #[rstest]
    fn identity_follows_hydrated_devices(workspace: Workspace) {
        let mut entity = entity(&workspace.root);
        assert!(entity.identity().name.is_empty());
        entity.add_position(position("b1", 1)).expect("position");
        assert_eq!(entity.identity().name, "Truck 1");
        assert_eq!(entity.identity().serial_number, "G1");
    }

    #[rstest]
    fn records_for_other_devices_are_refused(workspace: Workspace) {
        let mut entity = entity(&workspace.root);
        let err = entity
            .add_position(position("b2", 1))
            .expect_err("mismatched device");
        assert_eq!(
            err,
            TrackingError::DeviceMismatch {
                expected: EntityId::from("b1"),
                found: Some(EntityId::from("b2")),
            }
        );
        assert!(!entity.has_new_gps_data());
    }

    #[rstest]
    #[case::untracked("DiagnosticUnknownId", "untracked")]
    #[case::wrong_category("DiagnosticLowOilId", "category")]
    fn status_records_must_match_a_status_diagnostic(
        workspace: Workspace,
        #[case] diagnostic: &str,
        #[case] expected: &str,
    ) {
        let mut entity = entity(&workspace.root);
        let err = entity
            .add_status(status(diagnostic, 1))
            .expect_err("status should be refused");
        let kind = match err {
            TrackingError::UntrackedDiagnostic { .. } => "untracked",
            TrackingError::CategoryMismatch { .. } => "category",
            other => panic!("unexpected error {other:?}"),
        };
        assert_eq!(kind, expected);
    }

    #[rstest]
    fn failed_flush_keeps_buffers(workspace: Workspace) {
        let mut entity = entity(&workspace.root.join("missing"));
        entity.add_position(position("b1", 1)).expect("position");

        let err = entity.flush(at(30)).expect_err("directory is missing");
        assert!(matches!(err, SinkError::Io { .. }));
        assert!(entity.has_new_gps_data());
    }
}
