//! Synthetic maps for tests, laid out in meters around an origin.

use geo::{LineString, Point, Polygon};

use crate::{
    DEFAULT_LANG, Feature, FeatureId, FeatureKind, MapData, MapId, geometry::offset_point,
};

/// Builds a [`MapData`] from features placed in meters east and north of an
/// origin point.
#[derive(Debug, Clone)]
pub struct TestMapBuilder {
    map: MapData,
    origin: Point<f64>,
}

impl TestMapBuilder {
    /// Somewhere in Berlin.
    pub const DEFAULT_ORIGIN: Point<f64> = Point(geo::Coord { x: 13.4, y: 52.5 });

    pub fn new(map_id: MapId) -> Self {
        Self {
            map: MapData::new(map_id),
            origin: Self::DEFAULT_ORIGIN,
        }
    }

    pub fn with_origin(mut self, origin: Point<f64>) -> Self {
        self.origin = origin;
        self
    }

    pub fn point(&self, east_m: f64, north_m: f64) -> Point<f64> {
        offset_point(self.origin, east_m, north_m)
    }

    pub fn poi(self, id: FeatureId, east_m: f64, north_m: f64, name: &str) -> Self {
        let feature =
            Feature::new(id, FeatureKind::Poi, self.point(east_m, north_m)).with_name(DEFAULT_LANG, name);
        self.feature(feature)
    }

    /// Square building of `half_size_m` around the given offset.
    pub fn building(
        self,
        id: FeatureId,
        east_m: f64,
        north_m: f64,
        half_size_m: f64,
        house_number: Option<&str>,
    ) -> Self {
        let corners = [
            (-half_size_m, -half_size_m),
            (half_size_m, -half_size_m),
            (half_size_m, half_size_m),
            (-half_size_m, half_size_m),
            (-half_size_m, -half_size_m),
        ];
        let ring: LineString<f64> = corners
            .iter()
            .map(|(de, dn)| self.point(east_m + de, north_m + dn))
            .collect::<Vec<_>>()
            .into();
        let mut feature = Feature::new(id, FeatureKind::Building, Polygon::new(ring, Vec::new()));
        if let Some(house_number) = house_number {
            feature = feature.with_house_number(house_number);
        }
        self.feature(feature)
    }

    pub fn street(self, id: FeatureId, vertices: &[(f64, f64)], name: &str) -> Self {
        let line: LineString<f64> = vertices
            .iter()
            .map(|(east, north)| self.point(*east, *north))
            .collect::<Vec<_>>()
            .into();
        let feature = Feature::new(id, FeatureKind::Street, line).with_name(DEFAULT_LANG, name);
        self.feature(feature)
    }

    pub fn feature(mut self, feature: Feature) -> Self {
        self.map.insert(feature);
        self
    }

    pub fn house_street(mut self, house: FeatureId, street_index: u32) -> Self {
        self.map.set_house_street_index(house, street_index);
        self
    }

    pub fn build(self) -> MapData {
        self.map
    }
}

/// A grid of parallel east-west streets 200 m apart, each lined with houses
/// 20 m north of it and 40 m apart. Street ids start at 1, house ids at 1000;
/// every house's nearest street is its own.
pub fn grid_map(map_id: MapId, streets: u32, houses_per_street: u32) -> MapData {
    let length = f64::from(houses_per_street.max(1)) * 40.0;
    let mut builder = TestMapBuilder::new(map_id);
    let mut house_id = 1000;
    for s in 0..streets {
        let north = f64::from(s) * 200.0;
        builder = builder.street(s + 1, &[(0.0, north), (length, north)], &format!("Street {}", s + 1));
        for h in 0..houses_per_street {
            let number = (h + 1).to_string();
            builder = builder
                .building(house_id, 20.0 + f64::from(h) * 40.0, north + 20.0, 5.0, Some(&number))
                .house_street(house_id, 0);
            house_id += 1;
        }
    }
    builder.build()
}
