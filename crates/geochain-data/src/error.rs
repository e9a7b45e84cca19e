use polars::prelude::PolarsError;
use thiserror::Error;

use crate::FeatureId;

pub type Result<T> = std::result::Result<T, DataError>;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),
    #[error("Invalid WKT for feature {feature_id}: {message}")]
    Wkt { feature_id: FeatureId, message: String },
    #[error("Unknown feature kind '{0}'")]
    UnknownKind(String),
    #[error("Missing value in column '{column}'")]
    MissingValue { column: &'static str },
    #[error("Language code {0} is out of range")]
    InvalidLang(u32),
}
