//! Borrowed view of one map plus its pending edits.

use std::ops::ControlFlow;

use geo::{Intersects, Rect};
use geochain_data::{
    Coverage, Editor, Feature, FeatureId, FeatureStatus, MapData, MapId,
    geometry_index::{DEFAULT_MAX_COVER_CELLS, MAX_DEPTH, cover_rect},
};

/// Read-only map storage the matcher runs against.
pub trait FeatureStore: Sync {
    fn map_id(&self) -> MapId;

    fn feature(&self, id: FeatureId) -> Option<&Feature>;

    /// Visits ids registered in cells overlapping `coverage`. Ids may repeat.
    fn for_each_index(
        &self,
        coverage: &Coverage,
        visit: &mut dyn FnMut(FeatureId) -> ControlFlow<()>,
    ) -> ControlFlow<()>;

    /// Index into the house's nearby streets of the street it is addressed on.
    fn house_street_index(&self, house: FeatureId) -> Option<u32>;
}

impl FeatureStore for MapData {
    fn map_id(&self) -> MapId {
        self.id()
    }

    fn feature(&self, id: FeatureId) -> Option<&Feature> {
        MapData::feature(self, id)
    }

    fn for_each_index(
        &self,
        coverage: &Coverage,
        visit: &mut dyn FnMut(FeatureId) -> ControlFlow<()>,
    ) -> ControlFlow<()> {
        MapData::for_each_index(self, coverage, visit)
    }

    fn house_street_index(&self, house: FeatureId) -> Option<u32> {
        MapData::house_street_index(self, house)
    }
}

/// Pending edits consulted on top of a [`FeatureStore`].
pub trait EditOverlay: Sync {
    /// Ids in `status`, ascending.
    fn features_by_status(&self, map_id: MapId, status: FeatureStatus) -> Vec<FeatureId>;

    fn feature_status(&self, map_id: MapId, id: FeatureId) -> FeatureStatus;

    fn edited_feature(&self, map_id: MapId, id: FeatureId) -> Option<&Feature>;
}

impl EditOverlay for Editor {
    fn features_by_status(&self, map_id: MapId, status: FeatureStatus) -> Vec<FeatureId> {
        self.map(map_id)
            .map(|edits| edits.features_by_status(status))
            .unwrap_or_default()
    }

    fn feature_status(&self, map_id: MapId, id: FeatureId) -> FeatureStatus {
        self.map(map_id)
            .map_or(FeatureStatus::Untouched, |edits| edits.status(id))
    }

    fn edited_feature(&self, map_id: MapId, id: FeatureId) -> Option<&Feature> {
        self.map(map_id).and_then(|edits| edits.edited_feature(id))
    }
}

/// Overlay with nothing in it.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEdits;

impl EditOverlay for NoEdits {
    fn features_by_status(&self, _map_id: MapId, _status: FeatureStatus) -> Vec<FeatureId> {
        Vec::new()
    }

    fn feature_status(&self, _map_id: MapId, _id: FeatureId) -> FeatureStatus {
        FeatureStatus::Untouched
    }

    fn edited_feature(&self, _map_id: MapId, _id: FeatureId) -> Option<&Feature> {
        None
    }
}

#[derive(Clone, Copy)]
pub struct MapContext<'a> {
    store: &'a dyn FeatureStore,
    edits: &'a dyn EditOverlay,
    max_cover_cells: usize,
}

impl std::fmt::Debug for MapContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapContext")
            .field("map_id", &self.store.map_id())
            .field("max_cover_cells", &self.max_cover_cells)
            .finish()
    }
}

impl<'a> MapContext<'a> {
    pub fn new(store: &'a dyn FeatureStore, edits: &'a dyn EditOverlay) -> Self {
        Self {
            store,
            edits,
            max_cover_cells: DEFAULT_MAX_COVER_CELLS,
        }
    }

    pub fn with_max_cover_cells(mut self, max_cover_cells: usize) -> Self {
        self.max_cover_cells = max_cover_cells.max(1);
        self
    }

    pub fn map_id(&self) -> MapId {
        self.store.map_id()
    }

    pub fn max_cover_cells(&self) -> usize {
        self.max_cover_cells
    }

    pub fn edits(&self) -> &'a dyn EditOverlay {
        self.edits
    }

    /// The feature as the query should see it: deleted features are gone,
    /// modified and created ones come from the overlay.
    pub fn feature(&self, id: FeatureId) -> Option<&'a Feature> {
        match self.edits.feature_status(self.map_id(), id) {
            FeatureStatus::Untouched => self.store.feature(id),
            FeatureStatus::Deleted => None,
            FeatureStatus::Modified | FeatureStatus::Created => {
                self.edits.edited_feature(self.map_id(), id)
            }
        }
    }

    pub fn feature_status(&self, id: FeatureId) -> FeatureStatus {
        self.edits.feature_status(self.map_id(), id)
    }

    pub fn house_street_index(&self, house: FeatureId) -> Option<u32> {
        self.store.house_street_index(house)
    }

    pub fn for_each_index(
        &self,
        coverage: &Coverage,
        visit: &mut dyn FnMut(FeatureId) -> ControlFlow<()>,
    ) -> ControlFlow<()> {
        self.store.for_each_index(coverage, visit)
    }

    /// Visits every live feature whose bounding rect intersects `rect`, once
    /// each, created features included.
    pub fn for_each_feature(&self, rect: &Rect<f64>, mut visit: impl FnMut(&'a Feature)) {
        let coverage = cover_rect(rect, MAX_DEPTH, self.max_cover_cells);
        let mut ids = Vec::new();
        let _ = self.for_each_index(&coverage, &mut |id| {
            ids.push(id);
            ControlFlow::Continue(())
        });
        ids.sort_unstable();
        ids.dedup();

        let intersects = |feature: &Feature| {
            feature
                .bounding_rect()
                .is_some_and(|bbox| bbox.intersects(rect))
        };
        for feature in ids.into_iter().filter_map(|id| self.feature(id)) {
            if intersects(feature) {
                visit(feature);
            }
        }
        for id in self
            .edits
            .features_by_status(self.map_id(), FeatureStatus::Created)
        {
            if let Some(feature) = self.edits.edited_feature(self.map_id(), id)
                && intersects(feature)
            {
                visit(feature);
            }
        }
    }
}
