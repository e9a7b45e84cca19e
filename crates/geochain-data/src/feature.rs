//! Map features as the matcher sees them: an id, a coarse kind, localized
//! names, an optional house number and a geometry in lon/lat degrees.

use std::{fmt, str::FromStr};

use geo::{BoundingRect, Centroid, Geometry, Line, Point, Rect};

use crate::error::DataError;

/// Index of a feature inside one map.
pub type FeatureId = u32;

/// Numeric language code of a feature name.
pub type Lang = u8;

/// Language slot used for names that carry no language, house numbers included.
pub const DEFAULT_LANG: Lang = 0;

/// Identifier of one loaded map.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MapId(pub u32);

impl fmt::Display for MapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "map#{}", self.0)
    }
}

/// What a feature is on the map.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureKind {
    Poi,
    Building,
    Street,
    /// Cities, towns and villages.
    Locality,
    /// States and countries.
    Region,
    Other,
}

impl FeatureKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Poi => "poi",
            Self::Building => "building",
            Self::Street => "street",
            Self::Locality => "locality",
            Self::Region => "region",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeatureKind {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "poi" => Ok(Self::Poi),
            "building" => Ok(Self::Building),
            "street" => Ok(Self::Street),
            "locality" => Ok(Self::Locality),
            "region" => Ok(Self::Region),
            "other" => Ok(Self::Other),
            _ => Err(DataError::UnknownKind(s.to_owned())),
        }
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalizedName {
    pub lang: Lang,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub id: FeatureId,
    pub kind: FeatureKind,
    pub names: Vec<LocalizedName>,
    pub house_number: Option<String>,
    pub geometry: Geometry<f64>,
}

impl Feature {
    pub fn new(id: FeatureId, kind: FeatureKind, geometry: impl Into<Geometry<f64>>) -> Self {
        Self {
            id,
            kind,
            names: Vec::new(),
            house_number: None,
            geometry: geometry.into(),
        }
    }

    pub fn with_name(mut self, lang: Lang, name: impl Into<String>) -> Self {
        self.names.push(LocalizedName {
            lang,
            name: name.into(),
        });
        self
    }

    pub fn with_house_number(mut self, house_number: impl Into<String>) -> Self {
        self.house_number = Some(house_number.into());
        self
    }

    /// Center used for every distance test: the centroid of the geometry.
    pub fn center(&self) -> Option<Point<f64>> {
        self.geometry.centroid()
    }

    pub fn bounding_rect(&self) -> Option<Rect<f64>> {
        self.geometry.bounding_rect()
    }

    /// Segments of a line feature. Empty for anything that is not a line.
    pub fn line_segments(&self) -> Vec<Line<f64>> {
        match &self.geometry {
            Geometry::Line(line) => vec![*line],
            Geometry::LineString(ls) => ls.lines().collect(),
            Geometry::MultiLineString(mls) => mls.iter().flat_map(|ls| ls.lines()).collect(),
            _ => Vec::new(),
        }
    }

    pub fn is_line(&self) -> bool {
        matches!(
            self.geometry,
            Geometry::Line(_) | Geometry::LineString(_) | Geometry::MultiLineString(_)
        )
    }

    /// Names whose language is accepted by `accept`.
    pub fn names_where<'a>(
        &'a self,
        mut accept: impl FnMut(Lang) -> bool + 'a,
    ) -> impl Iterator<Item = &'a str> + 'a {
        self.names
            .iter()
            .filter(move |n| accept(n.lang))
            .map(|n| n.name.as_str())
    }
}
