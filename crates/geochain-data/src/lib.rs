//! Read-only map data for the geochain matcher.
//!
//! Features, the geometry helpers and cell-grid index used to find them by
//! area, the pending-edit overlay, and loading from Polars frames.

use std::path::PathBuf;

use once_cell::sync::Lazy;

pub mod edits;
pub mod error;
pub mod feature;
pub mod frames;
pub mod geometry;
pub mod geometry_index;
pub mod map;
pub mod test_data;

pub use edits::{Editor, FeatureStatus, MapEdits};
pub use error::{DataError, Result};
pub use feature::{DEFAULT_LANG, Feature, FeatureId, FeatureKind, Lang, LocalizedName, MapId};
pub use frames::{MapFrames, SEARCH_ROW_COLUMNS, search_rows_frame};
pub use geometry_index::{CellId, Coverage, GeometryIndex};
pub use map::MapData;

pub const INDEX_DIR_DEFAULT: &str = "./geochain_index";

/// Where on-disk address indexes live. Read from `GEOCHAIN_INDEX_DIR`.
pub static INDEX_DIR: Lazy<PathBuf> = Lazy::new(|| {
    let dir =
        std::env::var("GEOCHAIN_INDEX_DIR").unwrap_or_else(|_| INDEX_DIR_DEFAULT.to_string());
    PathBuf::from(dir)
});
