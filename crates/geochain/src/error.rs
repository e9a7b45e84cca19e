use thiserror::Error;

#[derive(Error, Debug)]
pub enum GeochainError {
    #[error("Retrieval error: {0}")]
    Retrieval(#[from] crate::retrieval::RetrievalError),
    #[error("Index error: {0}")]
    Index(#[from] crate::index::IndexError),
    #[error("Map data error: {0}")]
    Data(#[from] geochain_data::DataError),
    #[error("DataFrame error: {0}")]
    DataFrame(#[from] polars::prelude::PolarsError),
    #[error(transparent)]
    Cancelled(#[from] crate::cancel::Cancelled),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Init Logging error: {0}")]
    InitLoggingError(#[from] tracing_subscriber::filter::ParseError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, GeochainError>;
