//! Shared fixtures for unit tests.

use geochain_data::{MapData, MapId, test_data::TestMapBuilder};

/// One street running east-west, two buildings north of it and a POI next to
/// the first building:
///
/// - street 20 from (-200, 0) to (200, 0)
/// - building 10, 10 m square centered at (0, 20), house number "1"
/// - building 11, 10 m square centered at (85, 35), house number "3"
/// - POI 5 at (0, 35)
///
/// Both buildings are addressed on their nearest street.
pub(crate) fn scenario_map() -> MapData {
    TestMapBuilder::new(MapId(1))
        .street(20, &[(-200.0, 0.0), (200.0, 0.0)], "Main Street")
        .building(10, 0.0, 20.0, 5.0, Some("1"))
        .building(11, 85.0, 35.0, 5.0, Some("3"))
        .poi(5, 0.0, 35.0, "Blue Cafe")
        .house_street(10, 0)
        .house_street(11, 0)
        .build()
}
