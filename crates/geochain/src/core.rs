//! Query-level entry points.
//!
//! A [`Geocoder`] owns one map, its pending edits and its address index. Each
//! query runs in a [`QuerySession`] that owns the per-query caches; sessions
//! borrow the geocoder, so independent queries can run on separate threads
//! (see [`Geocoder::match_many`]).

use std::sync::Arc;

use geochain_data::{Editor, FeatureId, MapData, MapFrames, MapId, search_rows_frame};
use polars::prelude::*;
use rayon::prelude::*;
use tracing::{debug, info, instrument, warn};

use crate::{
    cancel::Cancellable,
    config::MatcherConfig,
    context::MapContext,
    error::Result,
    house_numbers::looks_like_house_number,
    index::{AddressIndex, IndexLocation},
    layer::{FeaturesLayer, IntersectionResult, SearchType, TokenRange},
    matcher::FeaturesLayerMatcher,
    path_finder::{FeaturesLayerPathFinder, PassStats},
    retrieval::{SearchQueryParams, retrieve_address_features},
};

/// Owned description of one layer, for callers that cannot keep the
/// candidate ids borrowed for the duration of a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerSpec {
    pub search_type: SearchType,
    pub sorted_features: Vec<FeatureId>,
    pub sub_query: String,
    pub token_range: TokenRange,
    pub last_token_is_prefix: bool,
    pub has_delayed_features: bool,
}

impl LayerSpec {
    /// Sorts and dedups `features`.
    pub fn new(search_type: SearchType, mut features: Vec<FeatureId>) -> Self {
        features.sort_unstable();
        features.dedup();
        Self {
            search_type,
            sorted_features: features,
            sub_query: String::new(),
            token_range: TokenRange::default(),
            last_token_is_prefix: false,
            has_delayed_features: false,
        }
    }

    pub fn with_sub_query(mut self, sub_query: impl Into<String>, last_token_is_prefix: bool) -> Self {
        self.sub_query = sub_query.into();
        self.last_token_is_prefix = last_token_is_prefix;
        self
    }

    pub fn with_token_range(mut self, token_range: TokenRange) -> Self {
        self.token_range = token_range;
        self
    }

    pub fn as_layer(&self) -> FeaturesLayer<'_> {
        FeaturesLayer::new(self.search_type, &self.sorted_features)
            .with_sub_query(&self.sub_query, self.last_token_is_prefix)
            .with_token_range(self.token_range)
            .with_delayed_features(self.has_delayed_features)
    }
}

/// Chains found for one layer stack.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChainOutcome {
    pub results: Vec<IntersectionResult>,
    /// The query was cancelled; `results` holds the chains completed before.
    pub cancelled: bool,
    pub stats: Option<PassStats>,
}

pub struct Geocoder {
    map: Arc<MapData>,
    edits: Arc<Editor>,
    index: Arc<AddressIndex>,
    config: MatcherConfig,
}

impl std::fmt::Debug for Geocoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Geocoder")
            .field("map_id", &self.map.id())
            .field("features", &self.map.len())
            .field("index", &self.index)
            .field("config", &self.config)
            .finish()
    }
}

impl Geocoder {
    /// Geocoder over an in-memory map with an in-RAM address index.
    #[instrument(name = "Create Geocoder", skip_all, level = "info", fields(map_id = %map.id()))]
    pub fn new(map: MapData, edits: Editor, config: MatcherConfig) -> Result<Self> {
        let rows = search_rows_frame(&map)?;
        let index = AddressIndex::new(map.id(), rows.lazy(), IndexLocation::InRam, false)?;
        Ok(Self::from_components(map, edits, index, config))
    }

    /// Loads a map from frames and creates or reuses its address index.
    #[instrument(name = "Create Geocoder from frames", skip(frames, config), level = "info")]
    pub fn from_frames(
        map_id: MapId,
        frames: &MapFrames,
        location: IndexLocation,
        config: MatcherConfig,
    ) -> Result<Self> {
        let t_init = std::time::Instant::now();
        let map = frames.to_map_data(map_id)?;
        let index = AddressIndex::new(map_id, frames.search_rows()?, location, false)?;
        info!(elapsed_seconds = ?t_init.elapsed(), features = map.len(), "Geocoder ready");
        Ok(Self::from_components(map, Editor::new(), index, config))
    }

    pub fn from_components(
        map: MapData,
        edits: Editor,
        index: AddressIndex,
        config: MatcherConfig,
    ) -> Self {
        if index.map_id() != map.id() {
            warn!(index = %index.map_id(), map = %map.id(), "Address index belongs to another map");
        }
        Self {
            map: Arc::new(map),
            edits: Arc::new(edits),
            index: Arc::new(index),
            config,
        }
    }

    pub fn map(&self) -> &MapData {
        &self.map
    }

    pub fn edits(&self) -> &Editor {
        &self.edits
    }

    /// Replaces the pending edits seen by new sessions.
    pub fn set_edits(&mut self, edits: Editor) {
        self.edits = Arc::new(edits);
    }

    pub fn index(&self) -> &AddressIndex {
        &self.index
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    pub fn context(&self) -> MapContext<'_> {
        MapContext::new(self.map.as_ref(), self.edits.as_ref())
            .with_max_cover_cells(self.config.max_cover_cells)
    }

    pub fn session<'a>(&'a self, cancellable: &'a dyn Cancellable) -> QuerySession<'a> {
        QuerySession {
            geocoder: self,
            cancellable,
            matcher: FeaturesLayerMatcher::new(self.context(), cancellable, self.config),
            finder: FeaturesLayerPathFinder::new(cancellable),
        }
    }

    /// Features of this map whose names match `params`.
    pub fn retrieve(
        &self,
        params: &SearchQueryParams,
        cancellable: &dyn Cancellable,
    ) -> Result<Vec<FeatureId>> {
        Ok(retrieve_address_features(
            &self.index,
            &self.context(),
            params,
            cancellable,
        )?)
    }

    /// Runs independent layer stacks in parallel, one session each.
    #[instrument(name = "Match many", skip_all, level = "info", fields(num_queries = queries.len()))]
    pub fn match_many(
        &self,
        queries: &[Vec<LayerSpec>],
        cancellable: &(dyn Cancellable + Sync),
    ) -> Vec<ChainOutcome> {
        queries
            .par_iter()
            .map(|layers| {
                let mut session = self.session(cancellable);
                let outcome = session.find_chains(layers);
                session.finish();
                outcome
            })
            .collect()
    }
}

/// One query against one map. Not shareable between threads; create one per
/// query and call [`QuerySession::finish`] (or drop it) afterwards.
pub struct QuerySession<'a> {
    geocoder: &'a Geocoder,
    cancellable: &'a dyn Cancellable,
    matcher: FeaturesLayerMatcher<'a>,
    finder: FeaturesLayerPathFinder<'a>,
}

impl QuerySession<'_> {
    /// Retrieves the candidates of one layer by name. Candidates of the wrong
    /// kind are dropped; building layers named by something that looks like a
    /// house number are flagged as having delayed features.
    pub fn retrieve_layer(
        &self,
        search_type: SearchType,
        sub_query: &str,
        token_range: TokenRange,
        last_token_is_prefix: bool,
    ) -> Result<LayerSpec> {
        let params = SearchQueryParams::from_query(sub_query, last_token_is_prefix);
        let context = self.matcher.context();
        let ids: Vec<FeatureId> = self
            .geocoder
            .retrieve(&params, self.cancellable)?
            .into_iter()
            .filter(|&id| {
                context
                    .feature(id)
                    .is_some_and(|f| search_type.accepts(f.kind))
            })
            .collect();
        debug!(%search_type, sub_query, candidates = ids.len(), "Layer retrieved");

        let mut layer = LayerSpec::new(search_type, ids)
            .with_sub_query(sub_query, last_token_is_prefix)
            .with_token_range(token_range);
        layer.has_delayed_features = search_type == SearchType::Building
            && looks_like_house_number(sub_query, last_token_is_prefix);
        Ok(layer)
    }

    /// Every full chain through `layers` (lowest type first).
    pub fn find_chains(&mut self, layers: &[LayerSpec]) -> ChainOutcome {
        let borrowed: Vec<FeaturesLayer<'_>> = layers.iter().map(LayerSpec::as_layer).collect();
        let mut results = Vec::new();
        match self
            .finder
            .find_reachable_vertices(&mut self.matcher, &borrowed, &mut results)
        {
            Ok(stats) => ChainOutcome {
                results,
                cancelled: false,
                stats: Some(stats),
            },
            Err(_) => {
                debug!(chains = results.len(), "Query cancelled");
                ChainOutcome {
                    results,
                    cancelled: true,
                    stats: None,
                }
            }
        }
    }

    /// Drops the per-query caches.
    pub fn finish(&mut self) {
        self.matcher.on_query_finished();
    }
}

/// One row per chain, one nullable `u32` column per layer type.
pub fn chains_frame(results: &[IntersectionResult]) -> PolarsResult<DataFrame> {
    let columns: Vec<Column> = SearchType::ALL
        .iter()
        .map(|&search_type| {
            let ids: Vec<Option<u32>> = results.iter().map(|r| r.get(search_type)).collect();
            Series::new(search_type.as_str().into(), ids).into()
        })
        .collect();
    DataFrame::new(columns)
}
