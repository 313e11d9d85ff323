use std::sync::Arc;

use thiserror::Error;

/// Failure surfaced by the query engine.
///
/// Errors are shared between the cache entry, every binding that observes it
/// and user callbacks, so the payloads are reference counted.
#[derive(Error, Debug, Clone)]
pub enum QueryError {
    #[error("{0:#}")]
    Failed(Arc<anyhow::Error>),

    #[error("Cached value could not be decoded: {0}")]
    Decode(Arc<serde_json::Error>),

    #[error("Fetch was cancelled")]
    Cancelled,
}

impl QueryError {
    pub fn failed(err: anyhow::Error) -> Self {
        QueryError::Failed(Arc::new(err))
    }

    /// The underlying transport error, if this is a fetch failure.
    pub fn cause(&self) -> Option<&anyhow::Error> {
        match self {
            QueryError::Failed(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, QueryError::Cancelled)
    }
}

impl From<anyhow::Error> for QueryError {
    fn from(err: anyhow::Error) -> Self {
        QueryError::failed(err)
    }
}

impl From<serde_json::Error> for QueryError {
    fn from(err: serde_json::Error) -> Self {
        QueryError::Decode(Arc::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_failed_display_includes_context_chain() {
        let err: anyhow::Result<()> = Err(anyhow::anyhow!("connection reset"));
        let err = err.context("Failed to fetch accounts").unwrap_err();
        let query_err = QueryError::from(err);
        assert_eq!(
            query_err.to_string(),
            "Failed to fetch accounts: connection reset"
        );
        assert!(query_err.cause().is_some());
    }

    #[test]
    fn test_cancelled() {
        assert!(QueryError::Cancelled.is_cancelled());
        assert!(QueryError::Cancelled.cause().is_none());
    }
}
