//! Read-only data of one loaded map.

use std::ops::ControlFlow;

use ahash::AHashMap as HashMap;
use tracing::trace;

use crate::{
    Feature, FeatureId, MapId,
    geometry_index::{Coverage, GeometryIndex},
};

#[derive(Debug, Clone)]
pub struct MapData {
    id: MapId,
    features: HashMap<FeatureId, Feature>,
    /// Building id to the index of its street in the building's nearby
    /// streets, ordered by distance.
    house_to_street: HashMap<FeatureId, u32>,
    geometry_index: GeometryIndex,
}

impl MapData {
    pub fn new(id: MapId) -> Self {
        Self {
            id,
            features: HashMap::new(),
            house_to_street: HashMap::new(),
            geometry_index: GeometryIndex::new(),
        }
    }

    pub fn id(&self) -> MapId {
        self.id
    }

    /// Adds a feature and registers its bounding rect in the geometry index.
    /// Features without a bounding rect (empty geometries) are kept but not
    /// indexed.
    pub fn insert(&mut self, feature: Feature) {
        match feature.bounding_rect() {
            Some(rect) => self.geometry_index.insert(feature.id, &rect),
            None => trace!(feature_id = feature.id, "feature has no extent, not indexed"),
        }
        self.features.insert(feature.id, feature);
    }

    pub fn set_house_street_index(&mut self, house: FeatureId, street_index: u32) {
        self.house_to_street.insert(house, street_index);
    }

    pub fn feature(&self, id: FeatureId) -> Option<&Feature> {
        self.features.get(&id)
    }

    pub fn features(&self) -> impl Iterator<Item = &Feature> {
        self.features.values()
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn geometry_index(&self) -> &GeometryIndex {
        &self.geometry_index
    }

    pub fn house_street_index(&self, house: FeatureId) -> Option<u32> {
        self.house_to_street.get(&house).copied()
    }

    pub fn for_each_index(
        &self,
        coverage: &Coverage,
        visit: impl FnMut(FeatureId) -> ControlFlow<()>,
    ) -> ControlFlow<()> {
        self.geometry_index.for_each_in_coverage(coverage, visit)
    }
}
