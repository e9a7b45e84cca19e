//! Lazily loaded street neighbourhoods.
//!
//! The vicinity of a street is every indexed feature whose center projects
//! onto the street polyline within the configured offset, sorted by that
//! projection distance. Vicinities are cached for the lifetime of one query.

use geo::{BoundingRect, MultiLineString, Rect};
use geochain_data::{
    FeatureId,
    geometry::{ProjectionCalculator, inflate_rect},
};
use tracing::{instrument, trace};

use crate::{
    cache::BoundedCache,
    cancel::{Cancellable, Cancelled, bail_if_cancelled},
    context::MapContext,
    retrieval::retrieve_geometry_features,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearbyFeature {
    pub id: FeatureId,
    pub distance_m: f64,
}

#[derive(Debug, Clone)]
pub struct StreetVicinity {
    nearby: Vec<NearbyFeature>,
    rect: Option<Rect<f64>>,
    calculator: Option<ProjectionCalculator>,
}

impl StreetVicinity {
    fn empty() -> Self {
        Self {
            nearby: Vec::new(),
            rect: None,
            calculator: None,
        }
    }

    /// Features in ascending projection distance.
    pub fn nearby(&self) -> &[NearbyFeature] {
        &self.nearby
    }

    /// Street bounding rect inflated by the offset.
    pub fn rect(&self) -> Option<&Rect<f64>> {
        self.rect.as_ref()
    }

    pub fn calculator(&self) -> Option<&ProjectionCalculator> {
        self.calculator.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.nearby.is_empty()
    }
}

#[derive(Debug)]
pub struct StreetVicinityLoader {
    scale: u8,
    offset_m: f64,
    cache: BoundedCache<FeatureId, StreetVicinity>,
}

impl StreetVicinityLoader {
    pub fn new(scale: u8, offset_m: f64, capacity: usize) -> Self {
        Self {
            scale,
            offset_m,
            cache: BoundedCache::new("street_vicinity", capacity),
        }
    }

    pub fn offset_m(&self) -> f64 {
        self.offset_m
    }

    /// Vicinity of `street_id`, loaded on first use. Absent streets and
    /// streets without line geometry get an empty vicinity.
    pub fn street(
        &mut self,
        context: &MapContext<'_>,
        cancellable: &dyn Cancellable,
        street_id: FeatureId,
    ) -> Result<&StreetVicinity, Cancelled> {
        let (scale, offset_m) = (self.scale, self.offset_m);
        self.cache.get_or_try_insert_with(street_id, |&id| {
            load_vicinity(context, cancellable, id, scale, offset_m)
        })
    }

    /// Calls `f` for every feature of the street's vicinity that is in
    /// `sorted_ids` and lies within `radius_m`, nearest first.
    pub fn for_each_in_vicinity(
        &mut self,
        context: &MapContext<'_>,
        cancellable: &dyn Cancellable,
        street_id: FeatureId,
        sorted_ids: &[FeatureId],
        radius_m: f64,
        mut f: impl FnMut(FeatureId),
    ) -> Result<(), Cancelled> {
        debug_assert!(
            radius_m <= self.offset_m,
            "vicinity radius {radius_m} exceeds loaded offset {}",
            self.offset_m
        );
        let vicinity = self.street(context, cancellable, street_id)?;
        for nearby in vicinity.nearby() {
            if nearby.distance_m > radius_m {
                break;
            }
            if sorted_ids.binary_search(&nearby.id).is_ok() {
                f(nearby.id);
            }
        }
        Ok(())
    }

    pub fn on_query_finished(&mut self) {
        self.cache.reset();
    }
}

#[instrument(name = "Load street vicinity", skip(context, cancellable), level = "trace")]
fn load_vicinity(
    context: &MapContext<'_>,
    cancellable: &dyn Cancellable,
    street_id: FeatureId,
    scale: u8,
    offset_m: f64,
) -> Result<StreetVicinity, Cancelled> {
    bail_if_cancelled(cancellable)?;
    let Some(street) = context.feature(street_id) else {
        trace!(street_id, "street not found");
        return Ok(StreetVicinity::empty());
    };
    let segments = street.line_segments();
    if segments.is_empty() {
        trace!(street_id, "street has no line geometry");
        return Ok(StreetVicinity::empty());
    }

    let lines = MultiLineString::new(
        segments
            .iter()
            .map(|s| vec![s.start, s.end].into())
            .collect(),
    );
    let Some(bbox) = lines.bounding_rect() else {
        return Ok(StreetVicinity::empty());
    };
    let rect = inflate_rect(&bbox, offset_m);
    let calculator = ProjectionCalculator::new(segments, offset_m);

    let ids = retrieve_geometry_features(context, cancellable, &rect, scale)?;
    let mut nearby: Vec<NearbyFeature> = ids
        .into_iter()
        .filter(|&id| id != street_id)
        .filter_map(|id| {
            let center = context.feature(id)?.center()?;
            let projection = calculator.project(center)?;
            Some(NearbyFeature {
                id,
                distance_m: projection.distance_m,
            })
        })
        .collect();
    nearby.sort_by(|a, b| a.distance_m.total_cmp(&b.distance_m).then(a.id.cmp(&b.id)));
    trace!(street_id, nearby = nearby.len(), "street vicinity loaded");

    Ok(StreetVicinity {
        nearby,
        rect: Some(rect),
        calculator: Some(calculator),
    })
}

#[cfg(test)]
mod tests {
    use geochain_data::{MapId, geometry_index::MAX_DEPTH, test_data::TestMapBuilder};

    use super::*;
    use crate::{
        cancel::{CancelFlag, NeverCancelled},
        context::NoEdits,
    };

    fn map() -> geochain_data::MapData {
        TestMapBuilder::new(MapId(1))
            .street(20, &[(-200.0, 0.0), (200.0, 0.0)], "Main")
            .poi(1, 0.0, 30.0, "a")
            .poi(2, 50.0, -80.0, "b")
            .poi(3, 0.0, 150.0, "c")
            .poi(4, 0.0, 700.0, "too far")
            .build()
    }

    #[test]
    fn test_vicinity_sorted_and_bounded() {
        let map = map();
        let ctx = MapContext::new(&map, &NoEdits);
        let mut loader = StreetVicinityLoader::new(MAX_DEPTH, 500.0, 8);

        let vicinity = loader.street(&ctx, &NeverCancelled, 20).unwrap();
        let ids: Vec<_> = vicinity.nearby().iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(vicinity.rect().is_some());

        let mut seen = Vec::new();
        loader
            .for_each_in_vicinity(&ctx, &NeverCancelled, 20, &[2, 3, 4], 100.0, |id| seen.push(id))
            .unwrap();
        assert_eq!(seen, vec![2]);
    }

    #[test]
    fn test_missing_street_is_empty() {
        let map = map();
        let ctx = MapContext::new(&map, &NoEdits);
        let mut loader = StreetVicinityLoader::new(MAX_DEPTH, 500.0, 8);
        assert!(loader.street(&ctx, &NeverCancelled, 99).unwrap().is_empty());
        // A POI is not a line.
        assert!(loader.street(&ctx, &NeverCancelled, 1).unwrap().is_empty());
    }

    #[test]
    fn test_cancelled_load() {
        let map = map();
        let ctx = MapContext::new(&map, &NoEdits);
        let flag = CancelFlag::new();
        flag.cancel();
        let mut loader = StreetVicinityLoader::new(MAX_DEPTH, 500.0, 8);
        assert_eq!(loader.street(&ctx, &flag, 20).err(), Some(Cancelled));
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "exceeds loaded offset")]
    fn test_radius_above_offset_panics_in_debug() {
        let map = map();
        let ctx = MapContext::new(&map, &NoEdits);
        let mut loader = StreetVicinityLoader::new(MAX_DEPTH, 100.0, 8);
        let _ = loader.for_each_in_vicinity(&ctx, &NeverCancelled, 20, &[1], 200.0, |_| {});
    }
}
