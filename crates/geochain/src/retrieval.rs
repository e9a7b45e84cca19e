//! Candidate retrieval: by name through the address index and by area
//! through the geometry index, both seen through the edit overlay.

use std::ops::ControlFlow;

use ahash::AHashSet as HashSet;
pub use error::RetrievalError;
use error::Result;
use geo::Rect;
use geochain_data::{
    DEFAULT_LANG, Feature, FeatureId, FeatureStatus, Lang, geometry_index::cover_rect,
};
use itertools::Itertools;
use tracing::{debug, instrument};

use crate::{
    cancel::{CancelPoller, Cancellable, Cancelled, bail_if_cancelled},
    context::MapContext,
    index::{AddressIndex, AddressQuery},
};

/// Lowercased alphanumeric runs, the way the address index tokenizes names.
pub fn name_tokens(s: &str) -> Vec<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQueryParams {
    /// One group per complete query token; every group must match and the
    /// entries of a group are synonyms.
    pub tokens: Vec<Vec<String>>,
    /// Alternatives for an unfinished last token.
    pub prefix_tokens: Vec<String>,
    /// Accepted name languages; empty accepts all.
    pub langs: HashSet<Lang>,
}

impl SearchQueryParams {
    /// Tokens of `query`; the last one becomes a prefix token when the user
    /// may still be typing it.
    pub fn from_query(query: &str, last_token_is_prefix: bool) -> Self {
        let mut tokens = name_tokens(query);
        let prefix_tokens = match tokens.pop() {
            Some(last) if last_token_is_prefix => vec![last],
            Some(last) => {
                tokens.push(last);
                Vec::new()
            }
            None => Vec::new(),
        };
        Self {
            tokens: tokens.into_iter().map(|t| vec![t]).collect(),
            prefix_tokens,
            langs: HashSet::new(),
        }
    }

    pub fn with_langs(mut self, langs: impl IntoIterator<Item = Lang>) -> Self {
        self.langs = langs.into_iter().collect();
        self
    }

    /// Adds alternatives for the complete token at `position`. A synonym of
    /// several words ("Main Street" for "ms") matches names that hold every
    /// one of its words.
    pub fn with_synonyms(
        mut self,
        position: usize,
        synonyms: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        if let Some(group) = self.tokens.get_mut(position) {
            group.extend(
                synonyms
                    .into_iter()
                    .map(|s| {
                        let s: String = s.into();
                        name_tokens(&s).join(" ")
                    })
                    .filter(|s| !s.is_empty()),
            );
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty() && self.prefix_tokens.is_empty()
    }

    fn accepts_lang(&self, lang: Lang) -> bool {
        self.langs.is_empty() || self.langs.contains(&lang)
    }

    fn as_address_query(&self) -> AddressQuery<'_> {
        AddressQuery {
            tokens: &self.tokens,
            prefix_tokens: &self.prefix_tokens,
            langs: &self.langs,
        }
    }
}

/// Matches one feature's names the way the address index would: all token
/// groups and the prefix must match within a single name of an accepted
/// language. House numbers count as names in the default language.
pub fn match_feature_by_name(feature: &Feature, params: &SearchQueryParams) -> bool {
    if params.is_empty() {
        return false;
    }
    let house_number = feature
        .house_number
        .as_deref()
        .filter(|_| params.accepts_lang(DEFAULT_LANG));
    feature
        .names_where(|lang| params.accepts_lang(lang))
        .chain(house_number)
        .any(|name| {
            let tokens = name_tokens(name);
            let groups_match = params
                .tokens
                .iter()
                .all(|group| {
                    group.iter().any(|synonym| {
                        let mut words = synonym.split_whitespace().peekable();
                        words.peek().is_some()
                            && words.all(|word| tokens.iter().any(|t| t == word))
                    })
                });
            let prefix_matches = params.prefix_tokens.is_empty()
                || params
                    .prefix_tokens
                    .iter()
                    .any(|p| tokens.iter().any(|t| t.starts_with(p.as_str())));
            groups_match && prefix_matches
        })
}

/// Features whose names match `params`: index matches of untouched features
/// plus edited and created features matched directly. Sorted and unique.
#[instrument(name = "Retrieve address features", skip_all, level = "debug", fields(map_id = %context.map_id()))]
pub fn retrieve_address_features(
    index: &AddressIndex,
    context: &MapContext<'_>,
    params: &SearchQueryParams,
    cancellable: &dyn Cancellable,
) -> Result<Vec<FeatureId>> {
    bail_if_cancelled(cancellable)?;
    let edits = context.edits();
    let map_id = context.map_id();
    let deleted = edits.features_by_status(map_id, FeatureStatus::Deleted);
    let modified = edits.features_by_status(map_id, FeatureStatus::Modified);
    let created = edits.features_by_status(map_id, FeatureStatus::Created);

    let mut poller = CancelPoller::new();
    let mut cancelled = false;
    let mut ids = Vec::new();
    let _ = index.for_each_match(&params.as_address_query(), |id| {
        if poller.tick(cancellable).is_err() {
            cancelled = true;
            return ControlFlow::Break(());
        }
        // Edited versions are matched below, against their new names.
        if deleted.binary_search(&id).is_err() && modified.binary_search(&id).is_err() {
            ids.push(id);
        }
        ControlFlow::Continue(())
    })?;
    if cancelled {
        return Err(Cancelled.into());
    }

    for id in modified.into_iter().merge(created) {
        poller.tick(cancellable)?;
        if edits
            .edited_feature(map_id, id)
            .is_some_and(|feature| match_feature_by_name(feature, params))
        {
            ids.push(id);
        }
    }

    ids.sort_unstable();
    ids.dedup();
    debug!(num_features = ids.len(), "Address features retrieved");
    Ok(ids)
}

/// Ids registered in the geometry index for cells covering `rect` at
/// `scale`. The cover is coarsened when it would need more cells than the
/// context allows. Sorted and unique.
pub fn retrieve_geometry_features(
    context: &MapContext<'_>,
    cancellable: &dyn Cancellable,
    rect: &Rect<f64>,
    scale: u8,
) -> std::result::Result<Vec<FeatureId>, Cancelled> {
    bail_if_cancelled(cancellable)?;
    let coverage = cover_rect(rect, scale, context.max_cover_cells());

    let mut poller = CancelPoller::new();
    let mut cancelled = false;
    let mut ids = Vec::new();
    let _ = context.for_each_index(&coverage, &mut |id| {
        if poller.tick(cancellable).is_err() {
            cancelled = true;
            return ControlFlow::Break(());
        }
        ids.push(id);
        ControlFlow::Continue(())
    });
    if cancelled {
        return Err(Cancelled);
    }
    ids.sort_unstable();
    ids.dedup();
    Ok(ids)
}

mod error {
    use thiserror::Error;

    use crate::{cancel::Cancelled, index::IndexError};

    #[derive(Error, Debug)]
    pub enum RetrievalError {
        #[error("Index error: {0}")]
        Index(#[from] IndexError),
        #[error(transparent)]
        Cancelled(#[from] Cancelled),
    }
    pub type Result<T> = std::result::Result<T, RetrievalError>;
}
