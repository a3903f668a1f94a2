//! Error types for runsim-genesis

use thiserror::Error;

/// Errors that can occur while extracting genesis metadata
#[derive(Error, Debug)]
pub enum GenesisError {
    /// The remote endpoint could not be reached or answered with an error
    #[error("failed to fetch genesis: {0}")]
    Fetch(String),

    /// Reading the body failed while computing the digest
    #[error("error calculating sha256: {0}")]
    Digest(String),

    /// The body is not a JSON object
    #[error("invalid json: {0}")]
    InvalidJson(String),

    /// The object was exhausted without the requested property
    #[error("{field} not found")]
    FieldNotFound { field: String },

    /// The requested property holds something other than a string
    #[error("invalid type for property {field:?}")]
    InvalidFieldType { field: String },

    /// The tokenizer task ended without reporting an outcome
    #[error("json tokenizer stopped before reporting a result")]
    TokenizerAborted,
}

impl From<reqwest::Error> for GenesisError {
    fn from(err: reqwest::Error) -> Self {
        GenesisError::Fetch(err.to_string())
    }
}
