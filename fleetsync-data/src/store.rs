//! Keyed storage for lookup entities.

use std::collections::HashMap;
use std::sync::Arc;

use fleetsync_core::{EntityId, Keyed};

/// Counts describing one merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeSummary {
    /// Keys seen for the first time.
    pub inserted: usize,
    /// Keys whose value was replaced.
    pub replaced: usize,
}

impl MergeSummary {
    /// Total entries written.
    #[must_use]
    pub const fn total(self) -> usize {
        self.inserted + self.replaced
    }
}

/// Map from identifier to shared entity with last-write-wins merging.
///
/// # Examples
///
/// ```
/// use fleetsync_core::Device;
/// use fleetsync_data::KeyedStore;
///
/// let mut store = KeyedStore::new();
/// store.merge_page(vec![Device::new("b1", "Truck 1", "G1")]);
/// let summary = store.merge_page(vec![Device::new("b1", "Truck One", "G1")]);
/// assert_eq!(summary.replaced, 1);
/// assert_eq!(store.len(), 1);
/// ```
#[derive(Debug)]
pub struct KeyedStore<T> {
    entries: HashMap<EntityId, Arc<T>>,
}

impl<T> Default for KeyedStore<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<T: Keyed> KeyedStore<T> {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace every entity in `page`; later entries win.
    pub fn merge_page<I>(&mut self, page: I) -> MergeSummary
    where
        I: IntoIterator<Item = T>,
    {
        let mut summary = MergeSummary::default();
        for entity in page {
            if self.insert(entity).is_some() {
                summary.replaced += 1;
            } else {
                summary.inserted += 1;
            }
        }
        summary
    }

    /// Insert or replace one entity, returning the previous value.
    pub fn insert(&mut self, entity: T) -> Option<Arc<T>> {
        self.entries.insert(entity.id().clone(), Arc::new(entity))
    }

    /// Insert or replace one entity and return the handle now stored.
    pub fn put(&mut self, entity: T) -> Arc<T> {
        let shared = Arc::new(entity);
        self.entries
            .insert(shared.id().clone(), Arc::clone(&shared));
        shared
    }

    /// Shared handle to the entity with `id`.
    #[must_use]
    pub fn get(&self, id: &EntityId) -> Option<Arc<T>> {
        self.entries.get(id).map(Arc::clone)
    }

    /// Whether `id` is present.
    #[must_use]
    pub fn contains(&self, id: &EntityId) -> bool {
        self.entries.contains_key(id)
    }

    /// Number of entities held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over the stored entities in no particular order.
    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.entries.values().map(AsRef::as_ref)
    }
}
