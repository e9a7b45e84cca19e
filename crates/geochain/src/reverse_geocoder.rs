//! Nearby-street lookups around a feature.

use geo::Point;
use geochain_data::{FeatureId, FeatureKind, geometry::{ProjectionCalculator, rect_around}};
use tracing::trace;

use crate::{cache::BoundedCache, context::MapContext};

/// Radius of the street search around a feature.
pub const LOOKUP_RADIUS_M: f64 = 500.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearbyStreet {
    pub id: FeatureId,
    pub distance_m: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct ReverseGeocoder {
    radius_m: f64,
}

impl Default for ReverseGeocoder {
    fn default() -> Self {
        Self::new(LOOKUP_RADIUS_M)
    }
}

impl ReverseGeocoder {
    pub fn new(radius_m: f64) -> Self {
        Self { radius_m }
    }

    pub fn radius_m(&self) -> f64 {
        self.radius_m
    }

    /// Streets whose projection from `center` lies within the lookup radius,
    /// nearest first (ties by id).
    pub fn nearby_streets(&self, context: &MapContext<'_>, center: Point<f64>) -> Vec<NearbyStreet> {
        let mut streets = Vec::new();
        context.for_each_feature(&rect_around(center, self.radius_m), |feature| {
            if feature.kind != FeatureKind::Street {
                return;
            }
            let calculator = ProjectionCalculator::new(feature.line_segments(), self.radius_m);
            if let Some(projection) = calculator.project(center) {
                streets.push(NearbyStreet {
                    id: feature.id,
                    distance_m: projection.distance_m,
                });
            }
        });
        streets.sort_by(|a, b| a.distance_m.total_cmp(&b.distance_m).then(a.id.cmp(&b.id)));
        streets
    }
}

/// Memoized per-query street lookups for the matcher.
#[derive(Debug)]
pub struct StreetLookup {
    geocoder: ReverseGeocoder,
    nearby: BoundedCache<FeatureId, Vec<NearbyStreet>>,
    matching: BoundedCache<FeatureId, Option<FeatureId>>,
}

impl StreetLookup {
    pub fn new(geocoder: ReverseGeocoder, nearby_capacity: usize, matching_capacity: usize) -> Self {
        Self {
            geocoder,
            nearby: BoundedCache::new("nearby_streets", nearby_capacity),
            matching: BoundedCache::new("matching_street", matching_capacity),
        }
    }

    pub fn nearby_streets(&mut self, context: &MapContext<'_>, id: FeatureId) -> &[NearbyStreet] {
        let geocoder = self.geocoder;
        self.nearby.get_or_insert_with(id, |&id| {
            match context.feature(id).and_then(|f| f.center()) {
                Some(center) => geocoder.nearby_streets(context, center),
                None => {
                    trace!(feature_id = id, "no feature for nearby streets");
                    Vec::new()
                }
            }
        })
    }

    /// The single street a house is addressed on, if the house-to-street table
    /// knows it and it is among the house's nearby streets.
    pub fn matching_street(&mut self, context: &MapContext<'_>, house: FeatureId) -> Option<FeatureId> {
        if let Some(street) = self.matching.get(&house) {
            return *street;
        }
        let street = context.house_street_index(house).and_then(|index| {
            self.nearby_streets(context, house)
                .get(index as usize)
                .map(|s| s.id)
        });
        *self.matching.get_or_insert_with(house, |_| street)
    }

    pub fn reset(&mut self) {
        self.nearby.reset();
        self.matching.reset();
    }
}
