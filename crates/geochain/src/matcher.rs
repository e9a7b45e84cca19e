//! Belongs-to rules between two adjacent layers.
//!
//! A [`LayerMatcher`] emits every `(child, parent)` pair where the child
//! feature belongs to the parent feature. Which rule applies depends on the
//! parent's type: POIs belong to buildings by distance, POIs belong to streets
//! through street vicinities, and buildings belong to the one street the
//! house-to-street table names.

use ahash::AHashMap as HashMap;
use geochain_data::{FeatureId, geometry::{distance_m, min_distance_m, rect_around}};
use tracing::{instrument, trace, warn};

use crate::{
    cancel::{CancelPoller, Cancellable, Cancelled, bail_if_cancelled},
    config::MatcherConfig,
    context::MapContext,
    house_numbers::{Parse, house_numbers_match, is_house_number, parse_query},
    layer::{FeaturesLayer, SearchType},
    reverse_geocoder::{ReverseGeocoder, StreetLookup},
    vicinity::StreetVicinityLoader,
};

pub trait LayerMatcher {
    /// Calls `emit(child_id, parent_id)` for every child feature that belongs
    /// to a parent feature. `child` must be of a lower type than `parent`.
    fn match_layers(
        &mut self,
        child: &FeaturesLayer<'_>,
        parent: &FeaturesLayer<'_>,
        emit: &mut dyn FnMut(FeatureId, FeatureId),
    ) -> Result<(), Cancelled>;
}

/// Matcher bound to one map context. Owns the per-query caches; call
/// [`FeaturesLayerMatcher::on_query_finished`] between queries.
pub struct FeaturesLayerMatcher<'a> {
    context: MapContext<'a>,
    cancellable: &'a dyn Cancellable,
    config: MatcherConfig,
    loader: StreetVicinityLoader,
    streets: StreetLookup,
}

impl<'a> FeaturesLayerMatcher<'a> {
    pub fn new(
        context: MapContext<'a>,
        cancellable: &'a dyn Cancellable,
        config: MatcherConfig,
    ) -> Self {
        Self {
            context: context.with_max_cover_cells(config.max_cover_cells),
            cancellable,
            config,
            loader: StreetVicinityLoader::new(
                config.vicinity_scale,
                config.vicinity_offset_m,
                config.street_vicinity_capacity,
            ),
            streets: StreetLookup::new(
                ReverseGeocoder::new(config.lookup_radius_m),
                config.nearby_streets_capacity,
                config.matching_streets_capacity,
            ),
        }
    }

    pub fn context(&self) -> &MapContext<'a> {
        &self.context
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Switches to another map. Cached lookups belong to the old one.
    pub fn set_context(&mut self, context: MapContext<'a>) {
        self.context = context.with_max_cover_cells(self.config.max_cover_cells);
        self.on_query_finished();
    }

    pub fn on_query_finished(&mut self) {
        self.loader.on_query_finished();
        self.streets.reset();
    }

    #[instrument(name = "Match POIs with buildings", skip_all, level = "trace", fields(pois = child.len(), buildings = parent.len()))]
    fn match_pois_with_buildings(
        &mut self,
        child: &FeaturesLayer<'_>,
        parent: &FeaturesLayer<'_>,
        emit: &mut dyn FnMut(FeatureId, FeatureId),
    ) -> Result<(), Cancelled> {
        let radius = self.config.building_radius_m;
        let pois = child.sorted_features();
        bail_if_cancelled(self.cancellable)?;

        let centers: Vec<_> = pois
            .iter()
            .map(|&id| self.context.feature(id).and_then(|f| f.center()))
            .collect();

        let mut processed = vec![false; pois.len()];
        let mut num_processed = centers.iter().filter(|c| c.is_none()).count();
        for (flag, center) in processed.iter_mut().zip(&centers) {
            *flag = center.is_none();
        }

        for &building_id in parent.sorted_features() {
            if num_processed == pois.len() {
                break;
            }
            bail_if_cancelled(self.cancellable)?;
            let Some(building) = self.context.feature(building_id) else {
                trace!(building_id, "building not found");
                continue;
            };
            for (j, center) in centers.iter().enumerate() {
                let Some(center) = center else { continue };
                if processed[j] {
                    continue;
                }
                if min_distance_m(&building.geometry, *center) <= radius {
                    emit(pois[j], building_id);
                    processed[j] = true;
                    num_processed += 1;
                }
            }
        }

        if !parent.has_delayed_features() {
            return Ok(());
        }

        // Buildings matched only by house number are not in the parent layer;
        // look them up around every POI.
        let parses = parse_query(parent.sub_query(), parent.last_token_is_prefix());
        if parses.is_empty() {
            return Ok(());
        }
        for (&poi, center) in pois.iter().zip(&centers) {
            let Some(center) = *center else { continue };
            bail_if_cancelled(self.cancellable)?;
            self.context
                .for_each_feature(&rect_around(center, radius), |feature| {
                    let Some(house_number) = feature.house_number.as_deref() else {
                        return;
                    };
                    if !house_numbers_match(house_number, &parses) {
                        return;
                    }
                    if feature
                        .center()
                        .is_some_and(|c| distance_m(c, center) < radius)
                    {
                        emit(poi, feature.id);
                    }
                });
        }
        Ok(())
    }

    #[instrument(name = "Match POIs with streets", skip_all, level = "trace", fields(pois = child.len(), streets = parent.len()))]
    fn match_pois_with_streets(
        &mut self,
        child: &FeaturesLayer<'_>,
        parent: &FeaturesLayer<'_>,
        emit: &mut dyn FnMut(FeatureId, FeatureId),
    ) -> Result<(), Cancelled> {
        let radius = self.config.street_radius_m;
        let pois = child.sorted_features();
        let streets = parent.sorted_features();

        if pois.len() < streets.len() {
            for &poi in pois {
                bail_if_cancelled(self.cancellable)?;
                for street in self.streets.nearby_streets(&self.context, poi) {
                    if street.distance_m > radius {
                        break;
                    }
                    if parent.contains(street.id) {
                        emit(poi, street.id);
                    }
                }
            }
            return Ok(());
        }

        for &street in streets {
            bail_if_cancelled(self.cancellable)?;
            self.loader.for_each_in_vicinity(
                &self.context,
                self.cancellable,
                street,
                pois,
                radius,
                |poi| emit(poi, street),
            )?;
        }
        Ok(())
    }

    #[instrument(name = "Match buildings with streets", skip_all, level = "trace", fields(buildings = child.len(), streets = parent.len(), delayed = child.has_delayed_features()))]
    fn match_buildings_with_streets(
        &mut self,
        child: &FeaturesLayer<'_>,
        parent: &FeaturesLayer<'_>,
        emit: &mut dyn FnMut(FeatureId, FeatureId),
    ) -> Result<(), Cancelled> {
        let buildings = child.sorted_features();
        let streets = parent.sorted_features();

        if !child.has_delayed_features() && buildings.len() < streets.len() {
            for &house in buildings {
                bail_if_cancelled(self.cancellable)?;
                if let Some(street) = self.streets.matching_street(&self.context, house)
                    && parent.contains(street)
                {
                    emit(house, street);
                }
            }
            return Ok(());
        }

        let Self {
            context,
            cancellable,
            config,
            loader,
            streets: street_lookup,
        } = self;
        let context: &MapContext<'_> = context;
        let cancellable: &dyn Cancellable = *cancellable;
        let lookup_radius_m = config.lookup_radius_m;

        let parses = parse_query(child.sub_query(), child.last_token_is_prefix());
        let mut filter = HouseFilter {
            context,
            cancellable,
            buildings: child,
            parses: &parses,
            poller: CancelPoller::new(),
            memo: HashMap::new(),
        };

        for &street in streets {
            bail_if_cancelled(cancellable)?;
            let vicinity = loader.street(context, cancellable, street)?;
            let Some(calculator) = vicinity.calculator() else {
                continue;
            };
            for nearby in vicinity.nearby() {
                let house = nearby.id;
                if !filter.accepts(house)? {
                    continue;
                }
                let Some(center) = context.feature(house).and_then(|f| f.center()) else {
                    continue;
                };
                let within_lookup = calculator
                    .project(center)
                    .is_some_and(|p| p.distance_m <= lookup_radius_m);
                if within_lookup && street_lookup.matching_street(context, house) == Some(street) {
                    emit(house, street);
                }
            }
        }
        Ok(())
    }
}

/// Decides whether a vicinity feature may stand for the building layer:
/// either it is a candidate, or the layer has delayed features and the
/// feature's house number matches the sub-query. Memoized per id.
struct HouseFilter<'c, 'a> {
    context: &'c MapContext<'a>,
    cancellable: &'c dyn Cancellable,
    buildings: &'c FeaturesLayer<'c>,
    parses: &'c [Parse],
    poller: CancelPoller,
    memo: HashMap<FeatureId, bool>,
}

impl HouseFilter<'_, '_> {
    fn accepts(&mut self, id: FeatureId) -> Result<bool, Cancelled> {
        if let Some(&accepted) = self.memo.get(&id) {
            return Ok(accepted);
        }
        self.poller.tick(self.cancellable)?;
        let accepted = self.buildings.contains(id)
            || (self.buildings.has_delayed_features()
                && self
                    .context
                    .feature(id)
                    .and_then(|f| f.house_number.as_deref())
                    .is_some_and(|hn| is_house_number(hn) && house_numbers_match(hn, self.parses)));
        self.memo.insert(id, accepted);
        Ok(accepted)
    }
}

impl LayerMatcher for FeaturesLayerMatcher<'_> {
    fn match_layers(
        &mut self,
        child: &FeaturesLayer<'_>,
        parent: &FeaturesLayer<'_>,
        emit: &mut dyn FnMut(FeatureId, FeatureId),
    ) -> Result<(), Cancelled> {
        if child.search_type() >= parent.search_type() {
            debug_assert!(
                false,
                "child layer {} must be below parent layer {}",
                child.search_type(),
                parent.search_type()
            );
            warn!(child = %child.search_type(), parent = %parent.search_type(), "Layer order violated, nothing matched");
            return Ok(());
        }

        match (parent.search_type(), child.search_type()) {
            (SearchType::Building, SearchType::Poi) => {
                self.match_pois_with_buildings(child, parent, emit)
            }
            (SearchType::Street, SearchType::Poi) => self.match_pois_with_streets(child, parent, emit),
            (SearchType::Street, SearchType::Building) => {
                self.match_buildings_with_streets(child, parent, emit)
            }
            (parent_type, child_type) => {
                debug_assert!(
                    false,
                    "no belongs-to rule for {child_type} under {parent_type}"
                );
                warn!(child = %child_type, parent = %parent_type, "No belongs-to rule, nothing matched");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use geochain_data::{
        MapId,
        test_data::{TestMapBuilder, grid_map},
    };

    use super::*;
    use crate::{
        cancel::{CancelFlag, NeverCancelled},
        context::NoEdits,
        layer::TokenRange,
        testing::scenario_map,
    };

    fn run(
        matcher: &mut FeaturesLayerMatcher<'_>,
        child: &FeaturesLayer<'_>,
        parent: &FeaturesLayer<'_>,
    ) -> Vec<(FeatureId, FeatureId)> {
        let mut pairs = Vec::new();
        matcher
            .match_layers(child, parent, &mut |c, p| pairs.push((c, p)))
            .unwrap();
        pairs.sort_unstable();
        pairs
    }

    #[test]
    fn test_poi_belongs_to_building_within_radius() {
        let map = scenario_map();
        let ctx = MapContext::new(&map, &NoEdits);
        let mut matcher = FeaturesLayerMatcher::new(ctx, &NeverCancelled, MatcherConfig::default());

        let pois = [5];
        let buildings = [10, 11];
        let child = FeaturesLayer::new(SearchType::Poi, &pois);
        let parent = FeaturesLayer::new(SearchType::Building, &buildings);
        assert_eq!(run(&mut matcher, &child, &parent), vec![(5, 10)]);

        let far = [11];
        let parent = FeaturesLayer::new(SearchType::Building, &far);
        assert!(run(&mut matcher, &child, &parent).is_empty());
    }

    #[test]
    fn test_first_building_wins() {
        let map = TestMapBuilder::new(MapId(1))
            .building(1, 0.0, 0.0, 5.0, None)
            .building(2, 20.0, 0.0, 5.0, None)
            .poi(7, 10.0, 0.0, "between")
            .build();
        let ctx = MapContext::new(&map, &NoEdits);
        let mut matcher = FeaturesLayerMatcher::new(ctx, &NeverCancelled, MatcherConfig::default());

        let pois = [7];
        let buildings = [1, 2];
        let child = FeaturesLayer::new(SearchType::Poi, &pois);
        let parent = FeaturesLayer::new(SearchType::Building, &buildings);
        assert_eq!(run(&mut matcher, &child, &parent), vec![(7, 1)]);
    }

    #[test]
    fn test_delayed_buildings_found_by_house_number() {
        let map = scenario_map();
        let ctx = MapContext::new(&map, &NoEdits);
        let mut matcher = FeaturesLayerMatcher::new(ctx, &NeverCancelled, MatcherConfig::default());

        let pois = [5];
        let none: [FeatureId; 0] = [];
        let child = FeaturesLayer::new(SearchType::Poi, &pois);
        let parent = FeaturesLayer::new(SearchType::Building, &none)
            .with_sub_query("1", false)
            .with_delayed_features(true);
        assert_eq!(run(&mut matcher, &child, &parent), vec![(5, 10)]);

        let parent = parent.with_sub_query("3", false);
        assert!(run(&mut matcher, &child, &parent).is_empty());
    }

    #[test]
    fn test_poi_street_directions_agree() {
        let map = TestMapBuilder::new(MapId(1))
            .street(20, &[(-200.0, 0.0), (200.0, 0.0)], "Main")
            .street(21, &[(-200.0, 300.0), (200.0, 300.0)], "Back")
            .street(22, &[(-200.0, 150.0), (200.0, 150.0)], "Middle")
            .poi(1, 0.0, 30.0, "a")
            .poi(2, 50.0, 240.0, "b")
            .poi(3, 0.0, 500.0, "c")
            .build();
        let ctx = MapContext::new(&map, &NoEdits);
        let mut matcher = FeaturesLayerMatcher::new(ctx, &NeverCancelled, MatcherConfig::default());

        // Fewer POIs than streets: nearby streets of every POI.
        let one_poi = [2];
        let streets = [20, 21, 22];
        let child = FeaturesLayer::new(SearchType::Poi, &one_poi);
        let parent = FeaturesLayer::new(SearchType::Street, &streets);
        assert_eq!(run(&mut matcher, &child, &parent), vec![(2, 21), (2, 22)]);

        // Otherwise street vicinities.
        let pois = [1, 2, 3];
        let child = FeaturesLayer::new(SearchType::Poi, &pois);
        assert_eq!(
            run(&mut matcher, &child, &parent),
            vec![(1, 20), (2, 21), (2, 22)]
        );
    }

    #[test]
    fn test_buildings_with_streets_both_paths() {
        let map = scenario_map();
        let ctx = MapContext::new(&map, &NoEdits);
        let mut matcher = FeaturesLayerMatcher::new(ctx, &NeverCancelled, MatcherConfig::default());

        let one = [10];
        let streets = [20, 21];
        let child = FeaturesLayer::new(SearchType::Building, &one);
        let parent = FeaturesLayer::new(SearchType::Street, &streets);
        assert_eq!(run(&mut matcher, &child, &parent), vec![(10, 20)]);

        let buildings = [10, 11];
        let street = [20];
        let child = FeaturesLayer::new(SearchType::Building, &buildings);
        let parent = FeaturesLayer::new(SearchType::Street, &street);
        assert_eq!(run(&mut matcher, &child, &parent), vec![(10, 20), (11, 20)]);
    }

    #[test]
    fn test_delayed_buildings_on_street() {
        let map = scenario_map();
        let ctx = MapContext::new(&map, &NoEdits);
        let mut matcher = FeaturesLayerMatcher::new(ctx, &NeverCancelled, MatcherConfig::default());

        let none: [FeatureId; 0] = [];
        let street = [20];
        let child = FeaturesLayer::new(SearchType::Building, &none)
            .with_sub_query("3", false)
            .with_token_range(TokenRange::new(2, 3))
            .with_delayed_features(true);
        let parent = FeaturesLayer::new(SearchType::Street, &street);
        assert_eq!(run(&mut matcher, &child, &parent), vec![(11, 20)]);
    }

    #[test]
    fn test_cancelled_match_stops() {
        let map = scenario_map();
        let ctx = MapContext::new(&map, &NoEdits);
        let flag = CancelFlag::new();
        flag.cancel();
        let mut matcher = FeaturesLayerMatcher::new(ctx, &flag, MatcherConfig::default());

        let pois = [5];
        let buildings = [10];
        let child = FeaturesLayer::new(SearchType::Poi, &pois);
        let parent = FeaturesLayer::new(SearchType::Building, &buildings);
        let mut pairs = Vec::new();
        let result = matcher.match_layers(&child, &parent, &mut |c, p| pairs.push((c, p)));
        assert_eq!(result, Err(Cancelled));
        assert!(pairs.is_empty());
    }

    #[test]
    fn test_caches_reset_with_context() {
        let map = scenario_map();
        let other = TestMapBuilder::new(MapId(2)).build();
        let mut matcher = FeaturesLayerMatcher::new(
            MapContext::new(&map, &NoEdits),
            &NeverCancelled,
            MatcherConfig::default(),
        );
        let one = [10];
        let streets = [20, 21];
        let child = FeaturesLayer::new(SearchType::Building, &one);
        let parent = FeaturesLayer::new(SearchType::Street, &streets);
        assert_eq!(run(&mut matcher, &child, &parent), vec![(10, 20)]);

        matcher.set_context(MapContext::new(&other, &NoEdits));
        assert_eq!(matcher.context().map_id(), MapId(2));
        assert!(run(&mut matcher, &child, &parent).is_empty());
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "must be below parent layer")]
    fn test_inverted_layers_panic_in_debug() {
        let map = scenario_map();
        let mut matcher = FeaturesLayerMatcher::new(
            MapContext::new(&map, &NoEdits),
            &NeverCancelled,
            MatcherConfig::default(),
        );
        let streets = [20];
        let pois = [5];
        let child = FeaturesLayer::new(SearchType::Street, &streets);
        let parent = FeaturesLayer::new(SearchType::Poi, &pois);
        let _ = matcher.match_layers(&child, &parent, &mut |_, _| {});
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "no belongs-to rule")]
    fn test_unsupported_parent_panics_in_debug() {
        let map = scenario_map();
        let mut matcher = FeaturesLayerMatcher::new(
            MapContext::new(&map, &NoEdits),
            &NeverCancelled,
            MatcherConfig::default(),
        );
        let streets = [20];
        let cities = [1];
        let child = FeaturesLayer::new(SearchType::Street, &streets);
        let parent = FeaturesLayer::new(SearchType::City, &cities);
        let _ = matcher.match_layers(&child, &parent, &mut |_, _| {});
    }

    #[test]
    fn test_matching_is_deterministic() {
        let map = grid_map(MapId(2), 3, 4);
        let ctx = MapContext::new(&map, &NoEdits);
        let mut matcher = FeaturesLayerMatcher::new(ctx, &NeverCancelled, MatcherConfig::default());

        let buildings: Vec<FeatureId> = (1000..1012).collect();
        let streets = [1, 2, 3];
        let child = FeaturesLayer::new(SearchType::Building, &buildings).with_token_range(TokenRange::new(1, 2));
        let parent = FeaturesLayer::new(SearchType::Street, &streets).with_token_range(TokenRange::new(0, 1));

        let first = run(&mut matcher, &child, &parent);
        // Second run is served from warm caches, the third from cold ones.
        let second = run(&mut matcher, &child, &parent);
        matcher.on_query_finished();
        let third = run(&mut matcher, &child, &parent);

        assert_eq!(first.len(), 12);
        assert_eq!(first, second);
        assert_eq!(first, third);
        assert!(first.iter().all(|&(house, street)| (house - 1000) / 4 + 1 == street));
    }
}
