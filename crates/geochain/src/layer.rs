//! Candidate layers and intersection results.

use std::fmt;

use geochain_data::{FeatureId, FeatureKind};
use serde::{Deserialize, Serialize};

/// Kind of entity a layer holds. Declaration order is the strict
/// belongs-to order: a layer may only be matched against a higher one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum SearchType {
    Poi,
    Building,
    Street,
    Village,
    City,
    State,
    Country,
    Unclassified,
}

impl SearchType {
    pub const COUNT: usize = 8;

    pub const ALL: [SearchType; Self::COUNT] = [
        Self::Poi,
        Self::Building,
        Self::Street,
        Self::Village,
        Self::City,
        Self::State,
        Self::Country,
        Self::Unclassified,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Poi => "poi",
            Self::Building => "building",
            Self::Street => "street",
            Self::Village => "village",
            Self::City => "city",
            Self::State => "state",
            Self::Country => "country",
            Self::Unclassified => "unclassified",
        }
    }

    /// Whether a map feature of `kind` can be a candidate of this layer.
    pub fn accepts(self, kind: FeatureKind) -> bool {
        match self {
            Self::Poi => kind == FeatureKind::Poi,
            Self::Building => kind == FeatureKind::Building,
            Self::Street => kind == FeatureKind::Street,
            Self::Village | Self::City => kind == FeatureKind::Locality,
            Self::State | Self::Country => kind == FeatureKind::Region,
            Self::Unclassified => true,
        }
    }
}

impl fmt::Display for SearchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Half-open range of query tokens `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TokenRange {
    pub start: usize,
    pub end: usize,
}

impl TokenRange {
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub const fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub const fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub const fn overlaps(&self, other: &TokenRange) -> bool {
        !self.is_empty() && !other.is_empty() && self.start < other.end && other.start < self.end
    }
}

/// One retrieved candidate set. Borrows its ids and sub-query from whoever
/// ran retrieval; the ids are ascending and unique.
#[derive(Debug, Clone, Copy)]
pub struct FeaturesLayer<'a> {
    sorted_features: &'a [FeatureId],
    sub_query: &'a str,
    token_range: TokenRange,
    search_type: SearchType,
    has_delayed_features: bool,
    last_token_is_prefix: bool,
}

impl<'a> FeaturesLayer<'a> {
    pub fn new(search_type: SearchType, sorted_features: &'a [FeatureId]) -> Self {
        debug_assert!(
            sorted_features.windows(2).all(|w| w[0] < w[1]),
            "layer features must be ascending and unique"
        );
        Self {
            sorted_features,
            sub_query: "",
            token_range: TokenRange::default(),
            search_type,
            has_delayed_features: false,
            last_token_is_prefix: false,
        }
    }

    pub fn with_sub_query(mut self, sub_query: &'a str, last_token_is_prefix: bool) -> Self {
        self.sub_query = sub_query;
        self.last_token_is_prefix = last_token_is_prefix;
        self
    }

    pub fn with_token_range(mut self, token_range: TokenRange) -> Self {
        self.token_range = token_range;
        self
    }

    pub fn with_delayed_features(mut self, has_delayed_features: bool) -> Self {
        self.has_delayed_features = has_delayed_features;
        self
    }

    /// Same layer over a different candidate set.
    pub fn with_features<'b>(&self, sorted_features: &'b [FeatureId]) -> FeaturesLayer<'b>
    where
        'a: 'b,
    {
        debug_assert!(
            sorted_features.windows(2).all(|w| w[0] < w[1]),
            "layer features must be ascending and unique"
        );
        FeaturesLayer {
            sorted_features,
            sub_query: self.sub_query,
            token_range: self.token_range,
            search_type: self.search_type,
            has_delayed_features: self.has_delayed_features,
            last_token_is_prefix: self.last_token_is_prefix,
        }
    }

    pub fn sorted_features(&self) -> &'a [FeatureId] {
        self.sorted_features
    }

    pub fn sub_query(&self) -> &'a str {
        self.sub_query
    }

    pub fn token_range(&self) -> TokenRange {
        self.token_range
    }

    pub fn search_type(&self) -> SearchType {
        self.search_type
    }

    pub fn has_delayed_features(&self) -> bool {
        self.has_delayed_features
    }

    pub fn last_token_is_prefix(&self) -> bool {
        self.last_token_is_prefix
    }

    pub fn len(&self) -> usize {
        self.sorted_features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sorted_features.is_empty()
    }

    pub fn contains(&self, id: FeatureId) -> bool {
        self.sorted_features.binary_search(&id).is_ok()
    }
}

/// One full chain: the feature picked from every layer of the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct IntersectionResult {
    ids: [Option<FeatureId>; SearchType::COUNT],
}

impl IntersectionResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, search_type: SearchType, id: FeatureId) {
        self.ids[search_type.index()] = Some(id);
    }

    pub fn get(&self, search_type: SearchType) -> Option<FeatureId> {
        self.ids[search_type.index()]
    }

    /// Filled slots in type order.
    pub fn iter(&self) -> impl Iterator<Item = (SearchType, FeatureId)> + '_ {
        SearchType::ALL
            .into_iter()
            .zip(self.ids.iter())
            .filter_map(|(t, id)| id.map(|id| (t, id)))
    }

    pub fn is_empty(&self) -> bool {
        self.ids.iter().all(Option::is_none)
    }
}

impl fmt::Display for IntersectionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (search_type, id)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{search_type}: {id}")?;
        }
        f.write_str("}")
    }
}
