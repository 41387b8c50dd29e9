//! Lookup entities referenced by feed records.

use serde::Deserialize;

use crate::diagnostic::DiagnosticType;
use crate::ids::{EntityId, EntityRef, Resolved};

/// Entities that can be stored in a keyed cache.
pub trait Keyed {
    /// Stable identifier used as the cache key.
    fn id(&self) -> &EntityId;
}

macro_rules! impl_keyed {
    ($($ty:ty),+ $(,)?) => {
        $(impl Keyed for $ty {
            fn id(&self) -> &EntityId {
                &self.id
            }
        })+
    };
}

/// A telematics device, normally fitted to one vehicle.
///
/// # Examples
///
/// ```
/// use fleetsync_core::{Device, Keyed};
///
/// let device = Device::new("b1", "Truck 1", "G9000001");
/// assert_eq!(device.id().as_str(), "b1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Device identifier.
    pub id: EntityId,
    /// Display name, usually the vehicle name.
    #[serde(default)]
    pub name: String,
    /// Hardware serial number.
    #[serde(default)]
    pub serial_number: String,
}

impl Device {
    /// Construct a device.
    pub fn new(
        id: impl Into<EntityId>,
        name: impl Into<String>,
        serial_number: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            serial_number: serial_number.into(),
        }
    }
}

/// The origin of a diagnostic or failure mode (for example a J1939 bus).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Source {
    /// Source identifier.
    pub id: EntityId,
    /// Display name.
    #[serde(default)]
    pub name: String,
}

/// An engine control unit that reports faults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Controller {
    /// Controller identifier.
    pub id: EntityId,
    /// Display name.
    #[serde(default)]
    pub name: String,
}

impl Controller {
    /// Construct a controller.
    pub fn new(id: impl Into<EntityId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// The way a component failed, attached to fault events.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FailureMode {
    /// Failure mode identifier.
    pub id: EntityId,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Numeric failure mode code.
    #[serde(default)]
    pub code: Option<i64>,
    /// Where the failure mode is defined.
    #[serde(default)]
    pub source: Option<Source>,
}

impl FailureMode {
    /// Construct a failure mode without a source.
    pub fn new(id: impl Into<EntityId>, name: impl Into<String>, code: Option<i64>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            code,
            source: None,
        }
    }
}

/// A unit that status readings are expressed in.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UnitOfMeasure {
    /// Unit identifier.
    pub id: EntityId,
    /// Display name.
    #[serde(default)]
    pub name: String,
}

impl UnitOfMeasure {
    /// Construct a unit of measure.
    pub fn new(id: impl Into<EntityId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// A user, referenced by dismissed fault events.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct User {
    /// User identifier.
    pub id: EntityId,
    /// Login name, when supplied.
    #[serde(default)]
    pub name: String,
}

/// A measurable quantity or fault code as delivered by the diagnostic feed.
///
/// The embedded controller and unit-of-measure references are raw; see
/// [`CachedDiagnostic`] for the resolved form.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    /// Diagnostic identifier.
    pub id: EntityId,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Diagnostic type, which decides the feed that carries its data.
    #[serde(default)]
    pub diagnostic_type: DiagnosticType,
    /// Where the diagnostic is defined.
    #[serde(default)]
    pub source: Option<Source>,
    /// Unit the readings are expressed in.
    #[serde(default)]
    pub unit_of_measure: EntityRef,
    /// Controller that reports the diagnostic.
    #[serde(default)]
    pub controller: EntityRef,
}

impl Diagnostic {
    /// Construct a diagnostic with no source, unit or controller.
    pub fn new(
        id: impl Into<EntityId>,
        name: impl Into<String>,
        diagnostic_type: DiagnosticType,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            diagnostic_type,
            source: None,
            unit_of_measure: EntityRef::None,
            controller: EntityRef::None,
        }
    }

    /// Attach a controller reference.
    #[must_use]
    pub fn with_controller(mut self, controller: EntityRef) -> Self {
        self.controller = controller;
        self
    }

    /// Attach a unit-of-measure reference.
    #[must_use]
    pub fn with_unit_of_measure(mut self, unit: EntityRef) -> Self {
        self.unit_of_measure = unit;
        self
    }
}

/// A diagnostic whose controller and unit have been resolved against the
/// reference cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedDiagnostic {
    /// Diagnostic identifier.
    pub id: EntityId,
    /// Display name.
    pub name: String,
    /// Diagnostic type.
    pub diagnostic_type: DiagnosticType,
    /// Where the diagnostic is defined.
    pub source: Option<Source>,
    /// Resolved unit of measure.
    pub unit_of_measure: Resolved<UnitOfMeasure>,
    /// Resolved controller.
    pub controller: Resolved<Controller>,
}

impl CachedDiagnostic {
    /// Combine a raw diagnostic with its resolved references.
    #[must_use]
    pub fn from_parts(
        diagnostic: Diagnostic,
        controller: Resolved<Controller>,
        unit_of_measure: Resolved<UnitOfMeasure>,
    ) -> Self {
        Self {
            id: diagnostic.id,
            name: diagnostic.name,
            diagnostic_type: diagnostic.diagnostic_type,
            source: diagnostic.source,
            unit_of_measure,
            controller,
        }
    }
}

impl_keyed!(
    Device,
    Source,
    Controller,
    FailureMode,
    UnitOfMeasure,
    User,
    Diagnostic,
    CachedDiagnostic,
);
