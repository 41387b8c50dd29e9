//! Identifiers, references and resolution results.
//!
//! Upstream records refer to other entities by identifier only. An
//! [`EntityRef`] captures such a reference, including the service's explicit
//! "none" markers, and a [`Resolved`] value is what a reference becomes once
//! it has been looked up in a cache.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};

use crate::entities::Keyed;

/// Identifiers the upstream service uses to say "no entity" explicitly.
const NONE_SENTINELS: &[&str] = &[
    "NoDeviceId",
    "NoDiagnosticId",
    "ControllerNoneId",
    "NoFailureModeId",
    "UnitOfMeasureNoneId",
    "NoUserId",
];

/// Stable identifier of an upstream entity.
///
/// # Examples
///
/// ```
/// use fleetsync_core::EntityId;
///
/// let id = EntityId::from("b12");
/// assert_eq!(id.as_str(), "b12");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Wrap a raw identifier.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Borrow the identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this identifier is one of the upstream "none" markers.
    #[must_use]
    pub fn is_none_sentinel(&self) -> bool {
        NONE_SENTINELS.contains(&self.0.as_str())
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier-level reference carried by raw records and lookup entities.
///
/// A missing reference and an explicit upstream marker both collapse to
/// [`EntityRef::None`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum EntityRef {
    /// Reference to the entity with this identifier.
    Id(EntityId),
    /// The upstream "none" marker.
    #[default]
    None,
}

impl EntityRef {
    /// Build a reference from a raw identifier, recognising "none" markers.
    ///
    /// # Examples
    ///
    /// ```
    /// use fleetsync_core::EntityRef;
    ///
    /// assert!(EntityRef::from_id("ControllerNoneId").is_none());
    /// assert_eq!(EntityRef::from_id("b1").id().map(|id| id.as_str()), Some("b1"));
    /// ```
    pub fn from_id(raw: impl Into<EntityId>) -> Self {
        let id = raw.into();
        if id.is_none_sentinel() {
            Self::None
        } else {
            Self::Id(id)
        }
    }

    /// Referenced identifier, if any.
    #[must_use]
    pub const fn id(&self) -> Option<&EntityId> {
        match self {
            Self::Id(id) => Some(id),
            Self::None => None,
        }
    }

    /// Whether this is the "none" marker.
    #[must_use]
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

/// Wire forms a reference may take: a bare identifier string or an object
/// carrying an `id` field.
#[derive(Deserialize)]
#[serde(untagged)]
enum WireRef {
    Bare(String),
    Object { id: String },
}

impl<'de> Deserialize<'de> for EntityRef {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let wire = Option::<WireRef>::deserialize(deserializer)?;
        Ok(match wire {
            Some(WireRef::Bare(id) | WireRef::Object { id }) => Self::from_id(id),
            None => Self::None,
        })
    }
}

/// Outcome of resolving an [`EntityRef`] against a cache.
#[derive(Debug, PartialEq)]
pub enum Resolved<T> {
    /// The fully populated entity.
    Found(Arc<T>),
    /// The reference was the upstream "none" marker.
    None,
    /// The identifier is unknown to the cache and to the upstream lookup.
    NotFound(EntityId),
}

impl<T> Resolved<T> {
    /// Borrow the resolved entity, if found.
    #[must_use]
    pub fn found(&self) -> Option<&T> {
        match self {
            Self::Found(entity) => Some(entity.as_ref()),
            Self::None | Self::NotFound(_) => None,
        }
    }

    /// Whether the reference resolved to the "none" marker.
    #[must_use]
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

impl<T: Keyed> Resolved<T> {
    /// Identifier of the referenced entity, whether or not it was found.
    #[must_use]
    pub fn id(&self) -> Option<&EntityId> {
        match self {
            Self::Found(entity) => Some(entity.id()),
            Self::NotFound(id) => Some(id),
            Self::None => None,
        }
    }
}

impl<T> Clone for Resolved<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Found(entity) => Self::Found(Arc::clone(entity)),
            Self::None => Self::None,
            Self::NotFound(id) => Self::NotFound(id.clone()),
        }
    }
}
