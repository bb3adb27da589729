//! Ordered mapping from resource to level.

use std::collections::HashSet;

use super::image::{Level, ResourceId};

/// Insertion-ordered mapping of `ResourceId` to `Level` with unique keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LevelMap {
    entries: Vec<(ResourceId, Level)>,
}

impl LevelMap {
    /// Creates an empty map.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Inserts or updates an entry. An existing key keeps its position.
    pub fn insert(&mut self, id: ResourceId, level: Level) {
        if let Some(entry) = self.entries.iter_mut().find(|(existing, _)| *existing == id) {
            entry.1 = level;
        } else {
            self.entries.push((id, level));
        }
    }

    /// Returns the level for `id`.
    #[must_use]
    pub fn get(&self, id: &ResourceId) -> Option<Level> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == id)
            .map(|(_, level)| *level)
    }

    /// Returns true if `id` is present.
    #[must_use]
    pub fn contains(&self, id: &ResourceId) -> bool {
        self.get(id).is_some()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &(ResourceId, Level)> {
        self.entries.iter()
    }

    /// Compares only the key sets.
    #[must_use]
    pub fn same_resources(&self, other: &Self) -> bool {
        if self.len() != other.len() {
            return false;
        }
        let ours: HashSet<&ResourceId> = self.entries.iter().map(|(id, _)| id).collect();
        other.entries.iter().all(|(id, _)| ours.contains(id))
    }

    /// Entries sorted by level, highest number first.
    /// Equal levels keep insertion order.
    #[must_use]
    pub fn by_level_desc(&self) -> Vec<(ResourceId, Level)> {
        let mut ordered = self.entries.clone();
        ordered.sort_by(|a, b| b.1.cmp(&a.1));
        ordered
    }
}

impl<I: Into<ResourceId>, L: Into<Level>> FromIterator<(I, L)> for LevelMap {
    fn from_iter<T: IntoIterator<Item = (I, L)>>(iter: T) -> Self {
        let mut map = Self::new();
        for (id, level) in iter {
            map.insert(id.into(), level.into());
        }
        map
    }
}
