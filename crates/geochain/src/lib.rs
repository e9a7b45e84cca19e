//! Geochain - layer intersection for address search
//!
//! A search query is split into layers (POI, building, street, ...), each
//! holding the candidate features whose names matched a part of the query.
//! Geochain finds every chain of features, one per layer, where each feature
//! belongs to the one in the layer above it: a POI inside or next to a
//! building, a building addressed on a street, a street near the POI.
//!
//! # Quick Start
//!
//! ```rust
//! use geochain::data::{Editor, MapId, test_data::TestMapBuilder};
//! use geochain::{Geocoder, MatcherConfig, NeverCancelled, SearchType, TokenRange};
//!
//! let map = TestMapBuilder::new(MapId(1))
//!     .street(20, &[(-200.0, 0.0), (200.0, 0.0)], "Main Street")
//!     .building(10, 0.0, 20.0, 5.0, Some("1"))
//!     .house_street(10, 0)
//!     .build();
//! let geocoder = Geocoder::new(map, Editor::new(), MatcherConfig::default())?;
//!
//! // "Main Street 1"
//! let mut session = geocoder.session(&NeverCancelled);
//! let houses = session.retrieve_layer(SearchType::Building, "1", TokenRange::new(2, 3), false)?;
//! let streets = session.retrieve_layer(SearchType::Street, "main street", TokenRange::new(0, 2), false)?;
//! let outcome = session.find_chains(&[houses, streets]);
//! assert_eq!(outcome.results.len(), 1);
//! assert_eq!(outcome.results[0].get(SearchType::Street), Some(20));
//! # Ok::<(), geochain::GeochainError>(())
//! ```
//!
//! # Cancellation
//!
//! Long-running work polls a [`Cancellable`]. A cancelled query stops within
//! a bounded number of steps and keeps the chains it had completed.
use once_cell::sync::OnceCell;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan};

mod cache;
mod cancel;
mod config;
mod context;
mod core;
pub mod error;
mod house_numbers;
mod index;
mod layer;
mod matcher;
mod path_finder;
mod retrieval;
mod reverse_geocoder;
mod vicinity;

#[cfg(test)]
mod testing;

pub use self::core::{ChainOutcome, Geocoder, LayerSpec, QuerySession, chains_frame};

pub use cache::BoundedCache;
pub use cancel::{CANCEL_CHECK_INTERVAL, CancelFlag, Cancellable, Cancelled, NeverCancelled};
pub use config::{MatcherConfig, MatcherConfigBuilder};
pub use context::{EditOverlay, FeatureStore, MapContext, NoEdits};
pub use error::{GeochainError, Result};
pub use geochain_data as data;
pub use house_numbers::{house_numbers_match, is_house_number, looks_like_house_number};
pub use index::{AddressIndex, AddressQuery, IndexError, IndexLocation};
pub use layer::{FeaturesLayer, IntersectionResult, SearchType, TokenRange};
pub use matcher::{FeaturesLayerMatcher, LayerMatcher};
pub use path_finder::{
    Direction, FeaturesLayerPathFinder, PassStats, calc_bottom_up_pass_cost,
    calc_top_down_pass_cost,
};
pub use polars;
pub use retrieval::{
    RetrievalError, SearchQueryParams, retrieve_address_features, retrieve_geometry_features,
};
pub use reverse_geocoder::{LOOKUP_RADIUS_M, NearbyStreet, ReverseGeocoder, StreetLookup};
pub use vicinity::{NearbyFeature, StreetVicinity, StreetVicinityLoader};

static LOGGER_INIT: OnceCell<()> = OnceCell::new();

/// Initialize logging for geochain.
///
/// `RUST_LOG` takes precedence over `level` when set. Safe to call more than
/// once; only the first call installs the subscriber.
///
/// ```rust
/// use geochain::init_logging;
/// use tracing::Level;
///
/// init_logging(Level::INFO)?;
/// # Ok::<(), geochain::GeochainError>(())
/// ```
pub fn init_logging(level: impl Into<LevelFilter>) -> Result<&'static ()> {
    LOGGER_INIT.get_or_try_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(level.into().to_string()))?
            .add_directive("tantivy=warn".parse()?);

        tracing_subscriber::fmt::fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::CLOSE)
            .init();
        Ok(())
    })
}
