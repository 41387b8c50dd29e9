//! Raw feed records and their hydrated counterparts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

use crate::entities::{CachedDiagnostic, Controller, Device, FailureMode, User};
use crate::ids::{EntityId, EntityRef, Resolved};

/// Records carrying an event time used to order output.
pub trait Timestamped {
    /// When the event happened.
    fn timestamp(&self) -> DateTime<Utc>;
}

/// A position report from the log record feed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    /// Record identifier.
    #[serde(default)]
    pub id: Option<EntityId>,
    /// When the position was recorded.
    pub date_time: DateTime<Utc>,
    /// Reporting device.
    #[serde(default)]
    pub device: EntityRef,
    /// Latitude in degrees.
    #[serde(default)]
    pub latitude: f64,
    /// Longitude in degrees.
    #[serde(default)]
    pub longitude: f64,
    /// Speed in km/h.
    #[serde(default)]
    pub speed: f32,
}

/// A diagnostic reading from the status data feed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusData {
    /// Record identifier.
    #[serde(default)]
    pub id: Option<EntityId>,
    /// When the reading was taken.
    pub date_time: DateTime<Utc>,
    /// Reporting device.
    #[serde(default)]
    pub device: EntityRef,
    /// Diagnostic that was measured.
    #[serde(default)]
    pub diagnostic: EntityRef,
    /// Measured value.
    #[serde(default)]
    pub data: f64,
}

/// A fault event from the fault data feed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultData {
    /// Record identifier.
    #[serde(default)]
    pub id: Option<EntityId>,
    /// When the fault was raised.
    pub date_time: DateTime<Utc>,
    /// Reporting device.
    #[serde(default)]
    pub device: EntityRef,
    /// Diagnostic that faulted.
    #[serde(default)]
    pub diagnostic: EntityRef,
    /// Controller that raised the fault.
    #[serde(default)]
    pub controller: EntityRef,
    /// How the component failed.
    #[serde(default)]
    pub failure_mode: EntityRef,
    /// Number of occurrences.
    #[serde(default)]
    pub count: i32,
    /// Upstream fault state label.
    #[serde(default)]
    pub fault_state: Option<String>,
    /// Malfunction indicator lamp status.
    #[serde(default)]
    pub malfunction_lamp: bool,
    /// Red stop lamp status.
    #[serde(default)]
    pub red_stop_lamp: bool,
    /// Amber warning lamp status.
    #[serde(default)]
    pub amber_warning_lamp: bool,
    /// Protect warning lamp status.
    #[serde(default)]
    pub protect_warning_lamp: bool,
    /// When the fault was dismissed.
    #[serde(default)]
    pub dismiss_date_time: Option<DateTime<Utc>>,
    /// Who dismissed the fault.
    #[serde(default, deserialize_with = "dismiss_user")]
    pub dismiss_user: Option<User>,
}

/// A bare "none" marker means nobody dismissed the fault; an object is kept
/// as delivered.
fn dismiss_user<'de, D>(deserializer: D) -> Result<Option<User>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum WireUser {
        Bare(EntityId),
        Object(User),
    }

    Ok(match Option::<WireUser>::deserialize(deserializer)? {
        Some(WireUser::Bare(id)) => (!id.is_none_sentinel()).then(|| User {
            id,
            name: String::new(),
        }),
        Some(WireUser::Object(user)) => Some(user),
        None => None,
    })
}

/// Position report with its device resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct GpsRecord {
    /// The record as delivered.
    pub raw: LogRecord,
    /// Resolved device.
    pub device: Resolved<Device>,
}

/// Status reading with device and diagnostic resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusRecord {
    /// The record as delivered.
    pub raw: StatusData,
    /// Resolved device.
    pub device: Resolved<Device>,
    /// Resolved diagnostic.
    pub diagnostic: Resolved<CachedDiagnostic>,
}

/// Fault event with every reference resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct FaultRecord {
    /// The record as delivered.
    pub raw: FaultData,
    /// Resolved device.
    pub device: Resolved<Device>,
    /// Resolved diagnostic.
    pub diagnostic: Resolved<CachedDiagnostic>,
    /// Resolved controller.
    pub controller: Resolved<Controller>,
    /// Resolved failure mode.
    pub failure_mode: Resolved<FailureMode>,
}

impl Timestamped for GpsRecord {
    fn timestamp(&self) -> DateTime<Utc> {
        self.raw.date_time
    }
}

impl Timestamped for StatusRecord {
    fn timestamp(&self) -> DateTime<Utc> {
        self.raw.date_time
    }
}

impl Timestamped for FaultRecord {
    fn timestamp(&self) -> DateTime<Utc> {
        self.raw.date_time
    }
}
