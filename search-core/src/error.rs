//! Closed error kinds and their recovery policy (spec §7).

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum SearchError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Retried by `StoreGateway` in SSE mode; surfaces only once retries are exhausted.
    #[error("store error (transient): {0}")]
    StoreTransient(String),

    #[error("store error (fatal): {0}")]
    StoreFatal(String),

    /// Resolves the individual codec request to a failed result; never
    /// terminates the overall search.
    #[error("codec response timed out after {0:?}")]
    CodecTimeout(std::time::Duration),

    #[error("codec dispatch failed: {0}")]
    CodecDispatchFailed(String),

    #[error("search cancelled")]
    Cancelled,
}

impl SearchError {
    /// Whether this kind should terminate the whole search (vs. resolve a
    /// single in-flight record, e.g. a codec failure).
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SearchError::CodecTimeout(_) | SearchError::CodecDispatchFailed(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SearchError::InvalidRequest(_) => "InvalidRequest",
            SearchError::NotFound(_) => "NotFound",
            SearchError::StoreTransient(_) => "StoreTransient",
            SearchError::StoreFatal(_) => "StoreFatal",
            SearchError::CodecTimeout(_) => "CodecTimeout",
            SearchError::CodecDispatchFailed(_) => "CodecDispatchFailed",
            SearchError::Cancelled => "Cancelled",
        }
    }
}

impl From<crate::model::RequestValidationError> for SearchError {
    fn from(e: crate::model::RequestValidationError) -> Self {
        SearchError::InvalidRequest(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SearchError>;
