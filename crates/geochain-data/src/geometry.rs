//! Metric helpers over lon/lat geometries.
//!
//! Distances are great-circle distances in meters. Closest-point searches run
//! in a local equirectangular frame (longitude scaled by the cosine of the
//! latitude of the query point) so that "closest" agrees with meters at the
//! scales the matcher cares about (tens to hundreds of meters).

use std::f64::consts::PI;

use geo::{
    Centroid, Closest, ClosestPoint, Contains, Coord, Distance, Geometry, Haversine, Line,
    MapCoords, Point, Rect, coord,
};

pub const EARTH_RADIUS_M: f64 = 6_371_008.8;
pub const METERS_PER_DEGREE: f64 = EARTH_RADIUS_M * PI / 180.0;

// Keeps longitude scaling finite near the poles.
const MIN_COS_LAT: f64 = 1e-6;

fn lon_scale(lat: f64) -> f64 {
    lat.to_radians().cos().abs().max(MIN_COS_LAT)
}

/// Great-circle distance in meters.
pub fn distance_m(a: Point<f64>, b: Point<f64>) -> f64 {
    Haversine::distance(a, b)
}

/// Point displaced from `origin` by the given meters east and north.
pub fn offset_point(origin: Point<f64>, east_m: f64, north_m: f64) -> Point<f64> {
    let lat = origin.y() + north_m / METERS_PER_DEGREE;
    let lon = origin.x() + east_m / (METERS_PER_DEGREE * lon_scale(origin.y()));
    Point::new(lon, lat)
}

/// Square rect centered at `center` extending `half_size_m` in every direction.
pub fn rect_around(center: Point<f64>, half_size_m: f64) -> Rect<f64> {
    let dlat = half_size_m / METERS_PER_DEGREE;
    let dlon = half_size_m / (METERS_PER_DEGREE * lon_scale(center.y()));
    Rect::new(
        coord! { x: center.x() - dlon, y: center.y() - dlat },
        coord! { x: center.x() + dlon, y: center.y() + dlat },
    )
}

/// Grows `rect` by `meters` on every side.
pub fn inflate_rect(rect: &Rect<f64>, meters: f64) -> Rect<f64> {
    let widest_lat = rect.min().y.abs().max(rect.max().y.abs());
    let dlat = meters / METERS_PER_DEGREE;
    let dlon = meters / (METERS_PER_DEGREE * lon_scale(widest_lat));
    Rect::new(
        coord! { x: rect.min().x - dlon, y: rect.min().y - dlat },
        coord! { x: rect.max().x + dlon, y: rect.max().y + dlat },
    )
}

/// Smallest distance in meters from `point` to `geometry`; zero inside areas.
pub fn min_distance_m(geometry: &Geometry<f64>, point: Point<f64>) -> f64 {
    let inside = match geometry {
        Geometry::Polygon(polygon) => polygon.contains(&point),
        Geometry::MultiPolygon(polygons) => polygons.contains(&point),
        _ => false,
    };
    if inside {
        return 0.0;
    }

    let scale = lon_scale(point.y());
    let local = geometry.map_coords(|c| coord! { x: c.x * scale, y: c.y });
    let local_point = Point::new(point.x() * scale, point.y());
    match local.closest_point(&local_point) {
        Closest::Intersection(p) | Closest::SinglePoint(p) => {
            distance_m(Point::new(p.x() / scale, p.y()), point)
        }
        Closest::Indeterminate => geometry
            .centroid()
            .map_or(f64::INFINITY, |c| distance_m(c, point)),
    }
}

/// Closest point of a street polyline to some query point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    pub point: Point<f64>,
    pub distance_m: f64,
    /// Index of the segment the projection lies on.
    pub segment: usize,
}

/// Projects points onto a polyline, rejecting projections farther than
/// `max_distance_m`.
#[derive(Debug, Clone)]
pub struct ProjectionCalculator {
    segments: Vec<Line<f64>>,
    max_distance_m: f64,
}

impl ProjectionCalculator {
    pub fn new(segments: Vec<Line<f64>>, max_distance_m: f64) -> Self {
        Self {
            segments,
            max_distance_m,
        }
    }

    pub fn max_distance_m(&self) -> f64 {
        self.max_distance_m
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn project(&self, point: Point<f64>) -> Option<Projection> {
        let scale = lon_scale(point.y());
        let to_local = |c: Coord<f64>| coord! { x: c.x * scale, y: c.y };
        let local_point = Point::from(to_local(point.0));

        let mut best: Option<Projection> = None;
        for (segment, line) in self.segments.iter().enumerate() {
            let local_line = Line::new(to_local(line.start), to_local(line.end));
            let closest = match local_line.closest_point(&local_point) {
                Closest::Intersection(p) | Closest::SinglePoint(p) => p,
                Closest::Indeterminate => continue,
            };
            let on_line = Point::new(closest.x() / scale, closest.y());
            let distance_m = distance_m(point, on_line);
            if best.is_none_or(|b| distance_m < b.distance_m) {
                best = Some(Projection {
                    point: on_line,
                    distance_m,
                    segment,
                });
            }
        }
        best.filter(|p| p.distance_m <= self.max_distance_m)
    }
}

#[cfg(test)]
mod tests {
    use geo::{LineString, Polygon};

    use super::*;

    fn origin() -> Point<f64> {
        Point::new(13.4, 52.5)
    }

    fn square(center: Point<f64>, half_m: f64) -> Polygon<f64> {
        let corners = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)]
            .map(|(e, n)| offset_point(center, e * half_m, n * half_m));
        Polygon::new(LineString::from(corners.to_vec()), vec![])
    }

    #[test]
    fn test_offset_point_distance() {
        let p = offset_point(origin(), 30.0, 40.0);
        let d = distance_m(origin(), p);
        assert!((d - 50.0).abs() < 0.5, "expected ~50m, got {d}");
    }

    #[test]
    fn test_rect_around_contains_offsets() {
        let rect = rect_around(origin(), 100.0);
        let inside = offset_point(origin(), 99.0, -99.0);
        let outside = offset_point(origin(), 101.0, 0.0);
        assert!(rect.contains(&inside));
        assert!(!rect.contains(&outside));
    }

    #[test]
    fn test_inflate_rect_grows_both_axes() {
        let rect = rect_around(origin(), 10.0);
        let inflated = inflate_rect(&rect, 50.0);
        assert!(inflated.contains(&offset_point(origin(), 59.0, 59.0)));
        assert!(!inflated.contains(&offset_point(origin(), 61.0, 0.0)));
    }

    #[test]
    fn test_min_distance_inside_polygon_is_zero() {
        let building = Geometry::Polygon(square(origin(), 10.0));
        assert_eq!(min_distance_m(&building, offset_point(origin(), 2.0, 3.0)), 0.0);
    }

    #[test]
    fn test_min_distance_to_polygon_edge() {
        let building = Geometry::Polygon(square(origin(), 5.0));
        let d = min_distance_m(&building, offset_point(origin(), 0.0, 15.0));
        assert!((d - 10.0).abs() < 0.2, "expected ~10m, got {d}");
    }

    #[test]
    fn test_projection_onto_polyline() {
        let segments = LineString::from(vec![
            offset_point(origin(), -100.0, 0.0),
            offset_point(origin(), 100.0, 0.0),
            offset_point(origin(), 100.0, 100.0),
        ])
        .lines()
        .collect();
        let calculator = ProjectionCalculator::new(segments, 50.0);

        let near_first = calculator.project(offset_point(origin(), 0.0, 20.0)).unwrap();
        assert_eq!(near_first.segment, 0);
        assert!((near_first.distance_m - 20.0).abs() < 0.2);

        let near_second = calculator
            .project(offset_point(origin(), 130.0, 50.0))
            .unwrap();
        assert_eq!(near_second.segment, 1);
        assert!((near_second.distance_m - 30.0).abs() < 0.3);

        assert!(calculator.project(offset_point(origin(), 0.0, 80.0)).is_none());
    }

    #[test]
    fn test_empty_calculator_never_projects() {
        let calculator = ProjectionCalculator::new(Vec::new(), 500.0);
        assert!(calculator.is_empty());
        assert!(calculator.project(origin()).is_none());
    }
}
