use geochain_data::geometry_index::{DEFAULT_MAX_COVER_CELLS, MAX_DEPTH};
use serde::{Deserialize, Serialize};

use crate::{error::GeochainError, reverse_geocoder::LOOKUP_RADIUS_M};

/// Distances and cache sizes used by the layer matcher.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatcherConfig {
    /// POIs closer than this to a building belong to it.
    pub building_radius_m: f64,
    /// POIs closer than this to a street belong to it.
    pub street_radius_m: f64,
    /// Largest street projection distance accepted for a building.
    pub lookup_radius_m: f64,
    /// How far around a street its vicinity is loaded.
    pub vicinity_offset_m: f64,
    /// Grid level of vicinity lookups.
    pub vicinity_scale: u8,
    /// Cell budget of a single geometry lookup.
    pub max_cover_cells: usize,
    pub street_vicinity_capacity: usize,
    pub nearby_streets_capacity: usize,
    pub matching_streets_capacity: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            building_radius_m: 50.0,
            street_radius_m: 100.0,
            lookup_radius_m: LOOKUP_RADIUS_M,
            vicinity_offset_m: LOOKUP_RADIUS_M,
            vicinity_scale: MAX_DEPTH,
            max_cover_cells: DEFAULT_MAX_COVER_CELLS,
            street_vicinity_capacity: 1024,
            nearby_streets_capacity: 4096,
            matching_streets_capacity: 4096,
        }
    }
}

/// Builder for creating matcher configurations with ergonomic defaults
#[derive(Debug, Clone, Default)]
pub struct MatcherConfigBuilder {
    config: MatcherConfig,
}

impl MatcherConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: MatcherConfig::default(),
        }
    }

    /// Finer geometry lookups and larger caches, for dense city maps.
    pub fn precise() -> Self {
        let mut builder = Self::new();
        builder.config.max_cover_cells = 4096;
        builder.config.street_vicinity_capacity = 4096;
        builder.config.nearby_streets_capacity = 16_384;
        builder.config.matching_streets_capacity = 16_384;
        builder
    }

    /// Small caches and a coarser cover budget.
    pub fn low_memory() -> Self {
        let mut builder = Self::new();
        builder.config.max_cover_cells = 256;
        builder.config.street_vicinity_capacity = 128;
        builder.config.nearby_streets_capacity = 512;
        builder.config.matching_streets_capacity = 512;
        builder
    }

    pub fn building_radius(mut self, meters: f64) -> Self {
        self.config.building_radius_m = meters;
        self
    }

    pub fn street_radius(mut self, meters: f64) -> Self {
        self.config.street_radius_m = meters;
        self
    }

    pub fn lookup_radius(mut self, meters: f64) -> Self {
        self.config.lookup_radius_m = meters;
        self
    }

    pub fn vicinity_offset(mut self, meters: f64) -> Self {
        self.config.vicinity_offset_m = meters;
        self
    }

    /// Grid level for vicinity lookups, capped at the deepest level.
    pub fn vicinity_scale(mut self, scale: u8) -> Self {
        self.config.vicinity_scale = scale.min(MAX_DEPTH);
        self
    }

    pub fn max_cover_cells(mut self, cells: usize) -> Self {
        self.config.max_cover_cells = cells.max(1);
        self
    }

    pub fn cache_capacities(mut self, vicinities: usize, nearby: usize, matching: usize) -> Self {
        self.config.street_vicinity_capacity = vicinities;
        self.config.nearby_streets_capacity = nearby;
        self.config.matching_streets_capacity = matching;
        self
    }

    /// Build the final configuration.
    ///
    /// Street matching reads distances from loaded vicinities, so every radius
    /// has to fit inside the vicinity offset.
    pub fn build(self) -> Result<MatcherConfig, GeochainError> {
        let c = self.config;
        for (name, radius) in [
            ("building_radius_m", c.building_radius_m),
            ("street_radius_m", c.street_radius_m),
            ("lookup_radius_m", c.lookup_radius_m),
        ] {
            if !(radius.is_finite() && radius > 0.0) {
                return Err(GeochainError::ConfigError(format!(
                    "{name} must be positive, got {radius}"
                )));
            }
        }
        if c.street_radius_m > c.vicinity_offset_m || c.lookup_radius_m > c.vicinity_offset_m {
            return Err(GeochainError::ConfigError(format!(
                "street and lookup radii ({}, {}) must not exceed the vicinity offset {}",
                c.street_radius_m, c.lookup_radius_m, c.vicinity_offset_m
            )));
        }
        Ok(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matcher_config_default() {
        let config = MatcherConfig::default();
        assert_eq!(config.building_radius_m, 50.0);
        assert_eq!(config.street_radius_m, 100.0);
        assert_eq!(config.lookup_radius_m, 500.0);
        assert_eq!(config.vicinity_offset_m, 500.0);
        assert_eq!(config.vicinity_scale, MAX_DEPTH);
    }

    #[test]
    fn test_builder_defaults_match_default() {
        assert_eq!(MatcherConfigBuilder::new().build().unwrap(), MatcherConfig::default());
    }

    #[test]
    fn test_builder_presets() {
        let precise = MatcherConfigBuilder::precise().build().unwrap();
        assert_eq!(precise.max_cover_cells, 4096);
        assert_eq!(precise.street_vicinity_capacity, 4096);

        let low = MatcherConfigBuilder::low_memory().build().unwrap();
        assert_eq!(low.max_cover_cells, 256);
        assert_eq!(low.nearby_streets_capacity, 512);
        assert_eq!(low.street_radius_m, 100.0);
    }

    #[test]
    fn test_builder_fluent_interface() {
        let config = MatcherConfigBuilder::new()
            .building_radius(30.0)
            .street_radius(80.0)
            .vicinity_scale(40)
            .cache_capacities(1, 2, 3)
            .build()
            .unwrap();
        assert_eq!(config.building_radius_m, 30.0);
        assert_eq!(config.street_radius_m, 80.0);
        assert_eq!(config.vicinity_scale, MAX_DEPTH);
        assert_eq!(config.matching_streets_capacity, 3);
    }

    #[test]
    fn test_radius_above_offset_rejected() {
        let result = MatcherConfigBuilder::new()
            .vicinity_offset(200.0)
            .lookup_radius(300.0)
            .build();
        assert!(matches!(result, Err(GeochainError::ConfigError(_))));

        let result = MatcherConfigBuilder::new().building_radius(-1.0).build();
        assert!(result.is_err());
    }
}
