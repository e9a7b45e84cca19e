//! Loading map data from Polars frames.
//!
//! A map arrives as three lazy frames:
//! - `features`: `feature_id`, `kind`, `house_number` (nullable), `wkt`
//! - `names`: `feature_id`, `lang`, `name`
//! - `house_streets`: `house_id`, `street_index`
//!
//! The same data also feeds the address index as "search rows"
//! (`feature_id`, `lang`, `name`), house numbers included under
//! [`DEFAULT_LANG`].

use std::str::FromStr;

use ahash::AHashMap as HashMap;
use geo::Geometry;
use itertools::izip;
use polars::prelude::*;
use tracing::{debug, instrument};

use crate::{
    DEFAULT_LANG, Feature, FeatureId, FeatureKind, Lang, LocalizedName, MapData, MapId,
    error::{DataError, Result},
};

pub const SEARCH_ROW_COLUMNS: [&str; 3] = ["feature_id", "lang", "name"];

fn parse_wkt(feature_id: FeatureId, text: &str) -> Result<Geometry<f64>> {
    wkt::Wkt::<f64>::from_str(text)
        .map_err(|e| DataError::Wkt {
            feature_id,
            message: e.to_string(),
        })
        .and_then(|w| {
            w.try_into().map_err(|e: wkt::conversion::Error| DataError::Wkt {
                feature_id,
                message: format!("{e:?}"),
            })
        })
}

fn lang_from(value: u32) -> Result<Lang> {
    Lang::try_from(value).map_err(|_| DataError::InvalidLang(value))
}

#[derive(Clone)]
pub struct MapFrames {
    pub features: LazyFrame,
    pub names: LazyFrame,
    pub house_streets: LazyFrame,
}

impl MapFrames {
    pub fn new(features: LazyFrame, names: LazyFrame, house_streets: LazyFrame) -> Self {
        Self {
            features,
            names,
            house_streets,
        }
    }

    #[instrument(name = "Load map data", skip(self), level = "info")]
    pub fn to_map_data(&self, map_id: MapId) -> Result<MapData> {
        let features = self.features.clone().collect()?;
        let names = self.names.clone().collect()?;
        let house_streets = self.house_streets.clone().collect()?;

        let mut names_by_feature: HashMap<FeatureId, Vec<LocalizedName>> = HashMap::new();
        let name_ids = names.column("feature_id")?.cast(&DataType::UInt32)?;
        let langs = names.column("lang")?.cast(&DataType::UInt32)?;
        for (id, lang, name) in izip!(
            name_ids.u32()?,
            langs.u32()?,
            names.column("name")?.str()?
        ) {
            let (Some(id), Some(lang), Some(name)) = (id, lang, name) else {
                continue;
            };
            names_by_feature.entry(id).or_default().push(LocalizedName {
                lang: lang_from(lang)?,
                name: name.to_owned(),
            });
        }

        let mut map = MapData::new(map_id);
        let ids = features.column("feature_id")?.cast(&DataType::UInt32)?;
        for (id, kind, house_number, wkt) in izip!(
            ids.u32()?,
            features.column("kind")?.str()?,
            features.column("house_number")?.str()?,
            features.column("wkt")?.str()?
        ) {
            let id = id.ok_or(DataError::MissingValue {
                column: "feature_id",
            })?;
            let kind = FeatureKind::from_str(kind.ok_or(DataError::MissingValue { column: "kind" })?)?;
            let geometry = parse_wkt(id, wkt.ok_or(DataError::MissingValue { column: "wkt" })?)?;

            let mut feature = Feature::new(id, kind, geometry);
            feature.names = names_by_feature.remove(&id).unwrap_or_default();
            feature.house_number = house_number.map(str::to_owned);
            map.insert(feature);
        }

        let houses = house_streets.column("house_id")?.cast(&DataType::UInt32)?;
        let indices = house_streets
            .column("street_index")?
            .cast(&DataType::UInt32)?;
        for (house, index) in izip!(houses.u32()?, indices.u32()?) {
            if let (Some(house), Some(index)) = (house, index) {
                map.set_house_street_index(house, index);
            }
        }

        debug!(features = map.len(), "Map data loaded");
        Ok(map)
    }

    /// Rows to index by name: every localized name plus every house number.
    pub fn search_rows(&self) -> PolarsResult<LazyFrame> {
        let names = self.names.clone().select([
            col("feature_id").cast(DataType::UInt32),
            col("lang").cast(DataType::UInt32),
            col("name"),
        ]);
        let house_numbers = self
            .features
            .clone()
            .filter(col("house_number").is_not_null())
            .select([
                col("feature_id").cast(DataType::UInt32),
                lit(u32::from(DEFAULT_LANG))
                    .cast(DataType::UInt32)
                    .alias("lang"),
                col("house_number").alias("name"),
            ]);
        concat([names, house_numbers], UnionArgs::default())
    }
}

/// Search rows of an in-memory map, in the same shape as
/// [`MapFrames::search_rows`].
pub fn search_rows_frame(map: &MapData) -> PolarsResult<DataFrame> {
    let mut features: Vec<&Feature> = map.features().collect();
    features.sort_unstable_by_key(|f| f.id);

    let mut ids: Vec<u32> = Vec::new();
    let mut langs: Vec<u32> = Vec::new();
    let mut names: Vec<String> = Vec::new();
    for feature in features {
        for name in &feature.names {
            ids.push(feature.id);
            langs.push(u32::from(name.lang));
            names.push(name.name.clone());
        }
        if let Some(house_number) = &feature.house_number {
            ids.push(feature.id);
            langs.push(u32::from(DEFAULT_LANG));
            names.push(house_number.clone());
        }
    }
    df!(
        SEARCH_ROW_COLUMNS[0] => ids,
        SEARCH_ROW_COLUMNS[1] => langs,
        SEARCH_ROW_COLUMNS[2] => names,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames() -> MapFrames {
        let features = df!(
            "feature_id" => [1u32, 2, 3],
            "kind" => ["street", "building", "poi"],
            "house_number" => [None, Some("12a"), None],
            "wkt" => [
                "LINESTRING(13.40 52.50, 13.41 52.50)",
                "POLYGON((13.4050 52.5002, 13.4052 52.5002, 13.4052 52.5004, 13.4050 52.5004, 13.4050 52.5002))",
                "POINT(13.4051 52.5003)",
            ],
        )
        .unwrap();
        let names = df!(
            "feature_id" => [1u32, 1, 3],
            "lang" => [0u32, 3, 0],
            "name" => ["Main Street", "Hauptstrasse", "Cafe Blue"],
        )
        .unwrap();
        let house_streets = df!(
            "house_id" => [2u32],
            "street_index" => [0u32],
        )
        .unwrap();
        MapFrames::new(features.lazy(), names.lazy(), house_streets.lazy())
    }

    #[test]
    fn test_to_map_data() {
        let map = frames().to_map_data(MapId(4)).unwrap();
        assert_eq!(map.id(), MapId(4));
        assert_eq!(map.len(), 3);

        let street = map.feature(1).unwrap();
        assert_eq!(street.kind, FeatureKind::Street);
        assert!(street.is_line());
        assert_eq!(street.names.len(), 2);

        let building = map.feature(2).unwrap();
        assert_eq!(building.house_number.as_deref(), Some("12a"));
        assert!(matches!(building.geometry, Geometry::Polygon(_)));
        assert_eq!(map.house_street_index(2), Some(0));
    }

    #[test]
    fn test_bad_wkt_is_reported_with_feature() {
        let features = df!(
            "feature_id" => [7u32],
            "kind" => ["poi"],
            "house_number" => [None::<&str>],
            "wkt" => ["POINT(oops)"],
        )
        .unwrap();
        let mut frames = frames();
        frames.features = features.lazy();
        match frames.to_map_data(MapId(1)) {
            Err(DataError::Wkt { feature_id, .. }) => assert_eq!(feature_id, 7),
            other => panic!("expected WKT error, got {other:?}"),
        }
    }

    #[test]
    fn test_search_rows_include_house_numbers() {
        let rows = frames().search_rows().unwrap().collect().unwrap();
        assert_eq!(rows.height(), 4);
        let columns: Vec<_> = rows.get_column_names().iter().map(|s| s.as_str()).collect();
        assert_eq!(columns, SEARCH_ROW_COLUMNS);
        assert_eq!(rows.column("lang").unwrap().dtype(), &DataType::UInt32);

        let house_number_rows = rows
            .lazy()
            .filter(col("name").eq(lit("12a")))
            .collect()
            .unwrap();
        assert_eq!(house_number_rows.height(), 1);
        let ids = house_number_rows.column("feature_id").unwrap().u32().unwrap();
        assert_eq!(ids.get(0), Some(2));
        let langs = house_number_rows.column("lang").unwrap().u32().unwrap();
        assert_eq!(langs.get(0), Some(u32::from(DEFAULT_LANG)));

        let map = frames().to_map_data(MapId(4)).unwrap();
        let in_memory = search_rows_frame(&map).unwrap();
        assert_eq!(in_memory.height(), 4);
    }
}
