//! Pending edits layered over read-only map data.

use ahash::{AHashMap as HashMap, AHashSet as HashSet};

use crate::{Feature, FeatureId, MapId};

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureStatus {
    Untouched,
    Deleted,
    Modified,
    Created,
}

/// Edits of one map. A feature id is in at most one state at a time.
#[derive(Debug, Clone, Default)]
pub struct MapEdits {
    deleted: HashSet<FeatureId>,
    edited: HashMap<FeatureId, (FeatureStatus, Feature)>,
}

impl MapEdits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delete(&mut self, id: FeatureId) {
        // Deleting something that only exists as an edit simply drops it.
        if let Some((FeatureStatus::Created, _)) = self.edited.remove(&id) {
            return;
        }
        self.deleted.insert(id);
    }

    /// Replaces an existing feature with an edited version.
    pub fn modify(&mut self, feature: Feature) {
        self.deleted.remove(&feature.id);
        let status = match self.edited.get(&feature.id) {
            Some((FeatureStatus::Created, _)) => FeatureStatus::Created,
            _ => FeatureStatus::Modified,
        };
        self.edited.insert(feature.id, (status, feature));
    }

    /// Adds a feature that is not part of the map data.
    pub fn create(&mut self, feature: Feature) {
        self.deleted.remove(&feature.id);
        self.edited
            .insert(feature.id, (FeatureStatus::Created, feature));
    }

    pub fn status(&self, id: FeatureId) -> FeatureStatus {
        if self.deleted.contains(&id) {
            return FeatureStatus::Deleted;
        }
        self.edited
            .get(&id)
            .map_or(FeatureStatus::Untouched, |(status, _)| *status)
    }

    /// Ids in the given state, ascending. Untouched features are not tracked.
    pub fn features_by_status(&self, status: FeatureStatus) -> Vec<FeatureId> {
        let mut ids: Vec<FeatureId> = match status {
            FeatureStatus::Untouched => Vec::new(),
            FeatureStatus::Deleted => self.deleted.iter().copied().collect(),
            FeatureStatus::Modified | FeatureStatus::Created => self
                .edited
                .iter()
                .filter(|(_, (s, _))| *s == status)
                .map(|(id, _)| *id)
                .collect(),
        };
        ids.sort_unstable();
        ids
    }

    /// The edited version of a modified or created feature.
    pub fn edited_feature(&self, id: FeatureId) -> Option<&Feature> {
        self.edited.get(&id).map(|(_, feature)| feature)
    }

    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty() && self.edited.is_empty()
    }
}

/// Pending edits of every loaded map.
#[derive(Debug, Clone, Default)]
pub struct Editor {
    maps: HashMap<MapId, MapEdits>,
}

impl Editor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map_mut(&mut self, map_id: MapId) -> &mut MapEdits {
        self.maps.entry(map_id).or_default()
    }

    pub fn map(&self, map_id: MapId) -> Option<&MapEdits> {
        self.maps.get(&map_id)
    }
}

#[cfg(test)]
mod tests {
    use geo::point;

    use super::*;
    use crate::FeatureKind;

    fn poi(id: FeatureId) -> Feature {
        Feature::new(id, FeatureKind::Poi, point! { x: 13.4, y: 52.5 })
    }

    #[test]
    fn test_statuses_are_exclusive() {
        let mut edits = MapEdits::new();
        edits.delete(1);
        edits.modify(poi(2));
        edits.create(poi(3));

        assert_eq!(edits.status(1), FeatureStatus::Deleted);
        assert_eq!(edits.status(2), FeatureStatus::Modified);
        assert_eq!(edits.status(3), FeatureStatus::Created);
        assert_eq!(edits.status(4), FeatureStatus::Untouched);

        edits.modify(poi(1));
        assert_eq!(edits.status(1), FeatureStatus::Modified);
        assert_eq!(edits.features_by_status(FeatureStatus::Deleted), Vec::<u32>::new());
    }

    #[test]
    fn test_modifying_created_feature_keeps_it_created() {
        let mut edits = MapEdits::new();
        edits.create(poi(9));
        edits.modify(poi(9).with_name(0, "Cafe"));
        assert_eq!(edits.status(9), FeatureStatus::Created);
        assert_eq!(edits.edited_feature(9).unwrap().names.len(), 1);
    }

    #[test]
    fn test_deleting_created_feature_forgets_it() {
        let mut edits = MapEdits::new();
        edits.create(poi(9));
        edits.delete(9);
        assert_eq!(edits.status(9), FeatureStatus::Untouched);
        assert!(edits.is_empty());
    }

    #[test]
    fn test_features_by_status_sorted() {
        let mut edits = MapEdits::new();
        for id in [7, 3, 5] {
            edits.modify(poi(id));
        }
        assert_eq!(edits.features_by_status(FeatureStatus::Modified), vec![3, 5, 7]);
    }

    #[test]
    fn test_editor_keeps_maps_apart() {
        let mut editor = Editor::new();
        editor.map_mut(MapId(1)).delete(4);
        assert_eq!(editor.map(MapId(1)).unwrap().status(4), FeatureStatus::Deleted);
        assert!(editor.map(MapId(2)).is_none());
    }
}
