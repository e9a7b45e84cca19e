//! Finds every full chain through a stack of layers.
//!
//! The stack is ordered from the lowest layer (e.g. POIs) to the highest
//! (e.g. streets). The finder walks it one adjacent pair at a time, either
//! from the top down or from the bottom up depending on which looks cheaper,
//! narrowing the reachable set at each step and recording child-to-parent
//! edges. A chain is emitted only when every hop from the bottom layer to the
//! top resolves.

use ahash::AHashMap as HashMap;
use geochain_data::FeatureId;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::{
    cancel::{CancelPoller, Cancellable, Cancelled, bail_if_cancelled},
    house_numbers::looks_like_house_number,
    layer::{FeaturesLayer, IntersectionResult, SearchType},
    matcher::LayerMatcher,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    TopDown,
    BottomUp,
}

/// What one pass did, for logging and tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassStats {
    pub direction: Direction,
    pub top_down_cost: u64,
    pub bottom_up_cost: u64,
    /// Matcher invocations, one per adjacent layer pair visited.
    pub match_calls: usize,
    /// `(child, parent)` pairs emitted by the matcher.
    pub edges: usize,
}

impl PassStats {
    fn new(direction: Direction, top_down_cost: u64, bottom_up_cost: u64) -> Self {
        Self {
            direction,
            top_down_cost,
            bottom_up_cost,
            match_calls: 0,
            edges: 0,
        }
    }
}

/// Estimated work of a pass visiting layers of the given sizes in order:
/// each step costs the layer size times the smallest size seen so far.
fn calc_pass_cost(mut sizes: impl Iterator<Item = usize>) -> u64 {
    let Some(first) = sizes.next() else {
        return 0;
    };
    let mut reachable = first.max(1) as u64;
    let mut cost = 0u64;
    for size in sizes {
        let layer = size.max(1) as u64;
        cost = cost.saturating_add(layer.saturating_mul(reachable));
        reachable = reachable.min(layer);
    }
    cost
}

pub fn calc_top_down_pass_cost(layers: &[FeaturesLayer<'_>]) -> u64 {
    calc_pass_cost(layers.iter().rev().map(FeaturesLayer::len))
}

pub fn calc_bottom_up_pass_cost(layers: &[FeaturesLayer<'_>]) -> u64 {
    calc_pass_cost(layers.iter().map(FeaturesLayer::len))
}

/// Buildings named by something that looks like a house number may match
/// features that were never retrieved as candidates.
fn may_have_delayed_features(layer: &FeaturesLayer<'_>) -> bool {
    layer.search_type() == SearchType::Building
        && looks_like_house_number(layer.sub_query(), layer.last_token_is_prefix())
}

fn is_well_formed(layers: &[FeaturesLayer<'_>]) -> bool {
    let ordered = layers
        .windows(2)
        .all(|w| w[0].search_type() < w[1].search_type());
    let disjoint = layers.iter().enumerate().all(|(i, a)| {
        layers[i + 1..]
            .iter()
            .all(|b| !a.token_range().overlaps(&b.token_range()))
    });
    ordered && disjoint
}

/// Edges of one pass; `steps[i]` maps a feature of layer `i` to its parent in
/// layer `i + 1`.
struct ParentGraph {
    steps: Vec<HashMap<FeatureId, FeatureId>>,
}

impl ParentGraph {
    fn new(num_layers: usize) -> Self {
        Self {
            steps: vec![HashMap::new(); num_layers.saturating_sub(1)],
        }
    }

    fn path(&self, bottom: FeatureId, layers: &[FeaturesLayer<'_>]) -> Option<IntersectionResult> {
        let mut result = IntersectionResult::new();
        let mut id = bottom;
        result.set(layers[0].search_type(), id);
        for (step, layer) in self.steps.iter().zip(&layers[1..]) {
            id = *step.get(&id)?;
            result.set(layer.search_type(), id);
        }
        Some(result)
    }
}

#[derive(Clone, Copy)]
pub struct FeaturesLayerPathFinder<'a> {
    cancellable: &'a dyn Cancellable,
}

impl<'a> FeaturesLayerPathFinder<'a> {
    pub fn new(cancellable: &'a dyn Cancellable) -> Self {
        Self { cancellable }
    }

    /// Appends one result per full chain through `layers` (lowest first).
    ///
    /// On cancellation the error is returned and `results` holds only the
    /// complete chains appended before it.
    #[instrument(name = "Find reachable vertices", skip_all, level = "debug", fields(num_layers = layers.len()))]
    pub fn find_reachable_vertices<M: LayerMatcher + ?Sized>(
        &self,
        matcher: &mut M,
        layers: &[FeaturesLayer<'_>],
        results: &mut Vec<IntersectionResult>,
    ) -> Result<PassStats, Cancelled> {
        let top_down_cost = calc_top_down_pass_cost(layers);
        let bottom_up_cost = calc_bottom_up_pass_cost(layers);
        let direction = if bottom_up_cost < top_down_cost {
            Direction::BottomUp
        } else {
            Direction::TopDown
        };
        self.run(matcher, layers, results, PassStats::new(direction, top_down_cost, bottom_up_cost))
    }

    /// Same as [`Self::find_reachable_vertices`] with the direction forced.
    pub fn find_reachable_vertices_in<M: LayerMatcher + ?Sized>(
        &self,
        direction: Direction,
        matcher: &mut M,
        layers: &[FeaturesLayer<'_>],
        results: &mut Vec<IntersectionResult>,
    ) -> Result<PassStats, Cancelled> {
        let stats = PassStats::new(
            direction,
            calc_top_down_pass_cost(layers),
            calc_bottom_up_pass_cost(layers),
        );
        self.run(matcher, layers, results, stats)
    }

    fn run<M: LayerMatcher + ?Sized>(
        &self,
        matcher: &mut M,
        layers: &[FeaturesLayer<'_>],
        results: &mut Vec<IntersectionResult>,
        mut stats: PassStats,
    ) -> Result<PassStats, Cancelled> {
        if layers.is_empty() {
            return Ok(stats);
        }
        if !is_well_formed(layers) {
            debug_assert!(false, "malformed layer stack: {layers:?}");
            warn!(num_layers = layers.len(), "Malformed layer stack, no chains searched");
            return Ok(stats);
        }

        let num_results = results.len();
        match stats.direction {
            Direction::TopDown => self.top_down(matcher, layers, results, &mut stats)?,
            Direction::BottomUp => self.bottom_up(matcher, layers, results, &mut stats)?,
        }
        debug!(
            direction = ?stats.direction,
            top_down_cost = stats.top_down_cost,
            bottom_up_cost = stats.bottom_up_cost,
            match_calls = stats.match_calls,
            edges = stats.edges,
            chains = results.len() - num_results,
            "Layer pass complete"
        );
        Ok(stats)
    }

    fn top_down<M: LayerMatcher + ?Sized>(
        &self,
        matcher: &mut M,
        layers: &[FeaturesLayer<'_>],
        results: &mut Vec<IntersectionResult>,
        stats: &mut PassStats,
    ) -> Result<(), Cancelled> {
        let top = layers.len() - 1;
        let mut graph = ParentGraph::new(layers.len());
        let mut reachable: Vec<FeatureId> = layers[top].sorted_features().to_vec();

        for i in (1..=top).rev() {
            bail_if_cancelled(self.cancellable)?;
            if reachable.is_empty() {
                return Ok(());
            }
            if i != top {
                reachable.sort_unstable();
                reachable.dedup();
            }
            let parent = layers[i]
                .with_features(&reachable)
                .with_delayed_features(false);
            let child = layers[i - 1].with_delayed_features(may_have_delayed_features(&layers[i - 1]));

            let step = &mut graph.steps[i - 1];
            let mut buffer = Vec::new();
            matcher.match_layers(&child, &parent, &mut |c, p| {
                step.insert(c, p);
                buffer.push(c);
            })?;
            stats.match_calls += 1;
            stats.edges += buffer.len();
            reachable = buffer;
        }

        reachable.sort_unstable();
        reachable.dedup();
        self.extract(&reachable, layers, &graph, results)
    }

    fn bottom_up<M: LayerMatcher + ?Sized>(
        &self,
        matcher: &mut M,
        layers: &[FeaturesLayer<'_>],
        results: &mut Vec<IntersectionResult>,
        stats: &mut PassStats,
    ) -> Result<(), Cancelled> {
        let mut graph = ParentGraph::new(layers.len());
        let mut reachable: Vec<FeatureId> = layers[0].sorted_features().to_vec();

        for i in 0..layers.len() - 1 {
            bail_if_cancelled(self.cancellable)?;
            if reachable.is_empty() {
                return Ok(());
            }
            if i != 0 {
                reachable.sort_unstable();
                reachable.dedup();
            }
            let child = layers[i]
                .with_features(&reachable)
                .with_delayed_features(false);
            let parent =
                layers[i + 1].with_delayed_features(may_have_delayed_features(&layers[i + 1]));

            let step = &mut graph.steps[i];
            let mut buffer = Vec::new();
            matcher.match_layers(&child, &parent, &mut |c, p| {
                step.insert(c, p);
                buffer.push(p);
            })?;
            stats.match_calls += 1;
            stats.edges += buffer.len();
            reachable = buffer;
        }

        self.extract(layers[0].sorted_features(), layers, &graph, results)
    }

    fn extract(
        &self,
        bottom_ids: &[FeatureId],
        layers: &[FeaturesLayer<'_>],
        graph: &ParentGraph,
        results: &mut Vec<IntersectionResult>,
    ) -> Result<(), Cancelled> {
        let mut poller = CancelPoller::new();
        for &id in bottom_ids {
            poller.tick(self.cancellable)?;
            if let Some(result) = graph.path(id, layers) {
                results.push(result);
            }
        }
        Ok(())
    }
}
