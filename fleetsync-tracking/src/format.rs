//! Pipe-delimited output lines.
//!
//! Every line is a complete record: the tracked device's identity followed
//! by the record's own columns. Free text has the delimiter and line breaks
//! replaced with spaces, and absent values are written as empty columns.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use fleetsync_core::{Device, EntityId, FaultRecord, GpsRecord, Resolved, StatusRecord};

/// Header of position files.
pub const GPS_HEADER: &str = "Device ID|Device Serial Number|Device Name|GPS Time|Latitude|Longitude|Speed";
/// Header of status files.
pub const STATUS_HEADER: &str = "Device ID|Device Serial Number|Device Name|StatusData Time|Diagnostic ID|Name|Source|Value|Units";
/// Header of fault files.
pub const FAULT_HEADER: &str = "Device ID|Device Serial Number|Device Name|FaultData Time|Diagnostic ID|Diagnostic Name|Failure Mode Code|Failure Mode Name|Failure Mode Source|Controller Name|Fault Count|Fault State|Malfunction Lamp Lit|Red Stop Lamp Lit|Amber Warning Lamp Lit|Protect Warning Lamp Lit|DismissedDataTime|Dismissed User";

const DELIMITER: char = '|';

/// The kinds of output file a tracked device owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputCategory {
    /// Position reports.
    Gps,
    /// Status readings.
    Status,
    /// Fault events.
    Fault,
}

impl OutputCategory {
    /// Header line written at the top of every file of this category.
    #[must_use]
    pub const fn header(self) -> &'static str {
        match self {
            Self::Gps => GPS_HEADER,
            Self::Status => STATUS_HEADER,
            Self::Fault => FAULT_HEADER,
        }
    }

    /// Leading part of file names of this category.
    #[must_use]
    pub const fn file_prefix(self) -> &'static str {
        match self {
            Self::Gps => "GPS Data",
            Self::Status => "Status Data",
            Self::Fault => "Fault Data",
        }
    }
}

impl fmt::Display for OutputCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_prefix())
    }
}

/// Identity columns written at the start of every line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Device identifier.
    pub id: EntityId,
    /// Serial number; empty until the device is hydrated.
    pub serial_number: String,
    /// Display name; empty until the device is hydrated.
    pub name: String,
}

impl DeviceIdentity {
    /// Identity known only by identifier.
    #[must_use]
    pub const fn unresolved(id: EntityId) -> Self {
        Self {
            id,
            serial_number: String::new(),
            name: String::new(),
        }
    }

    /// Identity taken from a hydrated device.
    #[must_use]
    pub fn from_device(device: &Device) -> Self {
        Self {
            id: device.id.clone(),
            serial_number: device.serial_number.clone(),
            name: device.name.clone(),
        }
    }

    /// Adopt the name and serial number of `device` when it was hydrated.
    pub fn refresh(&mut self, device: &Resolved<Device>) {
        if let Some(found) = device.found() {
            found.name.clone_into(&mut self.name);
            found.serial_number.clone_into(&mut self.serial_number);
        }
    }
}

/// RFC 3339 UTC with millisecond precision.
#[must_use]
pub fn format_timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Replace the delimiter and line breaks with spaces.
#[must_use]
pub fn sanitise(text: &str) -> String {
    text.replace([DELIMITER, '\r', '\n'], " ")
}

const fn flag(value: bool) -> &'static str {
    if value { "True" } else { "False" }
}

fn join(columns: &[String]) -> String {
    columns.join("|")
}

fn identity_columns(identity: &DeviceIdentity) -> [String; 3] {
    [
        sanitise(identity.id.as_str()),
        sanitise(&identity.serial_number),
        sanitise(&identity.name),
    ]
}

fn reference_id(reference: &fleetsync_core::EntityRef) -> String {
    reference
        .id()
        .map(|id| sanitise(id.as_str()))
        .unwrap_or_default()
}

/// Line for one position report.
#[must_use]
pub fn gps_line(identity: &DeviceIdentity, record: &GpsRecord) -> String {
    let mut columns = identity_columns(identity).to_vec();
    columns.extend([
        format_timestamp(record.raw.date_time),
        record.raw.latitude.to_string(),
        record.raw.longitude.to_string(),
        record.raw.speed.to_string(),
    ]);
    join(&columns)
}

/// Line for one status reading.
#[must_use]
pub fn status_line(identity: &DeviceIdentity, record: &StatusRecord) -> String {
    let diagnostic = record.diagnostic.found();
    let mut columns = identity_columns(identity).to_vec();
    columns.extend([
        format_timestamp(record.raw.date_time),
        reference_id(&record.raw.diagnostic),
        diagnostic.map(|d| sanitise(&d.name)).unwrap_or_default(),
        diagnostic
            .and_then(|d| d.source.as_ref())
            .map(|source| sanitise(&source.name))
            .unwrap_or_default(),
        record.raw.data.to_string(),
        diagnostic
            .and_then(|d| d.unit_of_measure.found())
            .map(|unit| sanitise(&unit.name))
            .unwrap_or_default(),
    ]);
    join(&columns)
}

/// Line for one fault event.
#[must_use]
pub fn fault_line(identity: &DeviceIdentity, record: &FaultRecord) -> String {
    let raw = &record.raw;
    let failure_mode = record.failure_mode.found();
    let dismissed_by = raw.dismiss_user.as_ref();
    let mut columns = identity_columns(identity).to_vec();
    columns.extend([
        format_timestamp(raw.date_time),
        reference_id(&raw.diagnostic),
        record
            .diagnostic
            .found()
            .map(|d| sanitise(&d.name))
            .unwrap_or_default(),
        failure_mode
            .and_then(|mode| mode.code)
            .map(|code| code.to_string())
            .unwrap_or_default(),
        failure_mode
            .map(|mode| sanitise(&mode.name))
            .unwrap_or_default(),
        failure_mode
            .and_then(|mode| mode.source.as_ref())
            .map(|source| sanitise(&source.name))
            .unwrap_or_default(),
        record
            .controller
            .found()
            .map(|controller| sanitise(&controller.name))
            .unwrap_or_default(),
        raw.count.to_string(),
        raw.fault_state
            .as_deref()
            .map(sanitise)
            .unwrap_or_default(),
        flag(raw.malfunction_lamp).to_owned(),
        flag(raw.red_stop_lamp).to_owned(),
        flag(raw.amber_warning_lamp).to_owned(),
        flag(raw.protect_warning_lamp).to_owned(),
        dismissed_by
            .and(raw.dismiss_date_time)
            .map(format_timestamp)
            .unwrap_or_default(),
        dismissed_by
            .map(|user| sanitise(&user.name))
            .unwrap_or_default(),
    ]);
    join(&columns)
}
